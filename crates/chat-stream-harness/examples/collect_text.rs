use std::sync::Arc;

use chat_stream_harness::prelude::*;
use chat_stream_harness::vendors::anthropic::AnthropicProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let client = ChatClient::builder()
        .frame_source(Arc::new(AnthropicProvider::from_env()?))
        .model("claude-3-haiku-20240307")
        .build()?;
    let mut conversation = Conversation::new(client, RequestDefaults::default().max_tokens(256));

    let first = conversation
        .send_turn(Turn::user_text("Pick a colour. One word."), |_| {})
        .await?;
    let second = conversation
        .send_turn(Turn::user_text("Name a fruit of that colour."), |_| {})
        .await?;

    println!("{}\n{}", first.text, second.text);
    println!("{} turns in transcript", conversation.transcript().len());
    Ok(())
}
