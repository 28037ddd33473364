use chat_stream_harness::errors::HarnessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Harness(#[from] HarnessError),
}
