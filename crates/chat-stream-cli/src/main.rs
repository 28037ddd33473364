use std::sync::Arc;

use chat_stream_harness::observability::init_observability_with_default;
use chat_stream_harness::vendors::anthropic::AnthropicProvider;
use chat_stream_harness::{ChatClient, Conversation, RunOptions};
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

mod app;
mod cli;
mod config;
mod error;
mod prompt;

use crate::cli::Args;
use crate::error::CliError;
use crate::prompt::Prompter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    config::init();
    init_observability_with_default(false);
    let args = Args::parse();

    let mut options = RunOptions::default();
    if let Some(timeout) = args.timeout() {
        options = options.timeout(timeout);
    }
    let model = config::resolve_model(args.model.clone());
    let client = ChatClient::builder()
        .frame_source(Arc::new(AnthropicProvider::from_env()?))
        .model(model.as_str())
        .options(options)
        .build()?;
    info!(model = %model, verbose = args.verbose, "starting chat");

    let mut conversation = Conversation::new(client, args.request_defaults());
    if let Some(input) = args.one_shot() {
        let mut out = std::io::stdout();
        return app::run_once(&mut conversation, &mut out, input, args.verbose).await;
    }
    let mut prompter = Prompter::new(BufReader::new(tokio::io::stdin()), std::io::stdout());
    app::run(&mut conversation, &mut prompter, args.verbose).await
}
