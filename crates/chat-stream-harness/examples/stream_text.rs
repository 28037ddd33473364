use std::io::Write as _;
use std::sync::Arc;

use chat_stream_harness::prelude::*;
use chat_stream_harness::vendors::anthropic::AnthropicProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    chat_stream_harness::observability::init_observability();
    let client = ChatClient::builder()
        .frame_source(Arc::new(AnthropicProvider::from_env()?))
        .model("claude-3-haiku-20240307")
        .build()?;

    let body = RequestDefaults::default()
        .system("Reply in one short paragraph.")
        .request(vec![Turn::user_text("Stream a greeting.")]);
    let mut stream = client.start_stream(body).await?;

    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::TextDelta { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::Completed { response, .. } => {
                println!(
                    "\n[stop: {:?}, {} output tokens]",
                    response.stop_reason, response.usage.output_tokens
                );
            }
            StreamEvent::Error { error, .. } => eprintln!("run error: {error}"),
            StreamEvent::Started { .. } => {}
        }
    }

    let _ = stream.finish().await?;
    Ok(())
}
