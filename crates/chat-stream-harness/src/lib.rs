//! Streaming chat harness for hosted language models.
//!
//! A streaming inference call yields a sequence of event frames. This crate
//! decodes each frame ([`event`]), folds the sequence into a live text feed
//! and a finalized [`ChatResponse`] ([`aggregate`]), and threads the results
//! through an append-only [`Transcript`] ([`conversation`]).
//!
//! # Usage (Anthropic)
//!
//! ```no_run
//! use std::io::Write as _;
//! use std::sync::Arc;
//!
//! use chat_stream_harness::prelude::*;
//! use chat_stream_harness::vendors::anthropic::AnthropicProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let client = ChatClient::builder()
//!     .frame_source(Arc::new(AnthropicProvider::from_env()?))
//!     .model("claude-3-haiku-20240307")
//!     .build()?;
//!
//! let mut conversation = Conversation::new(client, RequestDefaults::default());
//! let reply = conversation
//!     .send_turn(Turn::user_text("Say hello"), |fragment| {
//!         print!("{fragment}");
//!         let _ = std::io::stdout().flush();
//!     })
//!     .await?;
//! println!("\n[{:?}]", reply.stop_reason);
//! # Ok(())
//! # }
//! ```

/// Stream aggregation into a finalized response.
pub mod aggregate;
/// Client entry point and builder.
pub mod client;
/// Conversation turns, content blocks and the transcript.
pub mod content;
/// Multi-turn conversation state.
pub mod conversation;
/// Public error types.
pub mod errors;
/// Event frame decoding.
pub mod event;
/// Image loading and base64 encoding.
pub mod image;
/// Model and provider identifiers plus run options.
pub mod model;
/// Logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// The frame source contract implemented by vendor integrations.
pub mod provider;
/// Request body types.
pub mod request;
/// Channel-based streaming handle and cancellation handle.
pub mod run;
/// Normalized public stream events.
pub mod stream;
/// Vendor-specific frame sources.
pub mod vendors;

pub use aggregate::{ChatResponse, StreamAggregator, Usage, aggregate};
pub use client::{ChatClient, ChatClientBuilder};
pub use content::{ContentBlock, ImageSource, Role, Transcript, Turn};
pub use conversation::Conversation;
pub use errors::{DecodeError, HarnessError, ProviderError, RunFailure};
pub use event::{StreamRecord, decode_frame};
pub use model::{ModelRef, ProviderId, RunOptions};
pub use provider::{FrameRequest, FrameSource, FrameStream};
pub use request::{ChatRequest, RequestDefaults};
pub use run::{AbortHandle, ChatStream};
pub use stream::StreamEvent;
