use std::time::Duration;

use chat_stream_harness::RequestDefaults;
use chat_stream_harness::request::{DEFAULT_ANTHROPIC_VERSION, DEFAULT_MAX_TOKENS};
use clap::Parser;

use crate::prompt::TurnInput;

/// Chat with a hosted model, printing each reply as it is generated.
#[derive(Debug, Parser)]
#[command(name = "chat-stream", version)]
pub struct Args {
    /// Print each request body before it is sent.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Model name (defaults to `CHAT_STREAM_MODEL`, then a built-in model).
    #[arg(long)]
    pub model: Option<String>,

    /// Output token budget per reply.
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    /// System prompt sent with every request.
    #[arg(long)]
    pub system: Option<String>,

    /// Protocol version string sent with every request.
    #[arg(long, default_value = DEFAULT_ANTHROPIC_VERSION)]
    pub anthropic_version: String,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Give up on a reply after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Ask a single question and exit instead of starting the interactive loop.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Image (local path or URL) sent ahead of `--prompt`. Repeatable.
    #[arg(long = "image", requires = "prompt")]
    pub images: Vec<String>,
}

impl Args {
    pub fn request_defaults(&self) -> RequestDefaults {
        let mut defaults = RequestDefaults::default()
            .anthropic_version(self.anthropic_version.clone())
            .max_tokens(self.max_tokens);
        if let Some(system) = &self.system {
            defaults = defaults.system(system.clone());
        }
        if let Some(temperature) = self.temperature {
            defaults = defaults.temperature(temperature);
        }
        defaults
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// The single turn to send when running non-interactively.
    pub fn one_shot(&self) -> Option<TurnInput> {
        let text = self.prompt.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        Some(TurnInput {
            images: self.images.clone(),
            text: text.to_string(),
        })
    }
}
