use std::fmt;
use std::time::Duration;

/// Stable identifier for a frame source implementation (for example `anthropic`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Model selection for a conversation.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelRef {
    /// Provider that serves the model.
    pub provider: ProviderId,
    /// Provider-specific model name (for example `claude-3-haiku-20240307`).
    pub model: String,
}

impl ModelRef {
    /// Creates a model reference.
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Per-turn streaming behavior.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RunOptions {
    /// Optional deadline for a whole turn, from opening the stream to the last frame.
    pub timeout: Option<Duration>,
    /// Bounded event buffer size used by `ChatStream`.
    pub stream_buffer_capacity: usize,
}

impl RunOptions {
    /// Sets the per-turn deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the bounded channel capacity used by `ChatStream`.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            stream_buffer_capacity: 128,
        }
    }
}
