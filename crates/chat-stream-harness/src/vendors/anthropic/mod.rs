//! Anthropic Messages API frame source.
//!
//! The HTTP response is a server-sent-event stream; the `data:` payload of
//! each event is one event frame for [`decode_frame`](crate::event::decode_frame).
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::AnthropicProvider;
pub use config::{AnthropicClientConfig, DEFAULT_BASE_URL};

/// Provider id reported by [`AnthropicProvider`].
pub const ANTHROPIC_PROVIDER: &str = "anthropic";
