use crate::model::ProviderId;

/// A single event frame could not be decoded.
///
/// Decode failures are fatal for the turn that produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object, or a field has the wrong shape.
    #[error("malformed event frame: {message}")]
    Malformed { message: String },
}

impl DecodeError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Errors returned by a frame source before they are normalized for the
/// public run API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response shape was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Terminal failure of a started turn, sent through `StreamEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum RunFailure {
    /// Provider returned a terminal failure.
    #[error("provider failure ({provider}): {message}")]
    Provider { provider: String, message: String },
    /// Network/stream transport failed.
    #[error("transport failure ({provider}): {message}")]
    Transport { provider: String, message: String },
    /// A frame could not be decoded.
    #[error("decode failure: {message}")]
    Decode { message: String },
    /// The source broke the streaming protocol.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
    /// The turn was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,
    /// The turn exceeded its deadline.
    #[error("run timed out")]
    TimedOut,
}

/// Top-level error type for the public harness API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Invalid client/provider configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input to the builder or conversation API.
    #[error("validation error: {0}")]
    Validation(String),
    /// Frame source failed before or while streaming.
    #[error(transparent)]
    Provider(ProviderError),
    /// A frame could not be decoded.
    #[error(transparent)]
    Decode(DecodeError),
    /// An image source could not be loaded or encoded.
    #[error("image error: {0}")]
    Image(String),
    /// Terminal failure returned from a started run.
    #[error(transparent)]
    RunFailed(RunFailure),
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HarnessError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Maps this error onto the failure reported by a streaming run.
    pub fn to_run_failure(&self) -> RunFailure {
        match self {
            Self::Provider(err) => run_failure_from_provider_error(err),
            Self::Decode(err) => RunFailure::Decode {
                message: err.to_string(),
            },
            Self::RunFailed(failure) => failure.clone(),
            other => RunFailure::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl From<ProviderError> for HarnessError {
    fn from(value: ProviderError) -> Self {
        HarnessError::Provider(value)
    }
}

impl From<DecodeError> for HarnessError {
    fn from(value: DecodeError) -> Self {
        HarnessError::Decode(value)
    }
}

impl From<RunFailure> for HarnessError {
    fn from(value: RunFailure) -> Self {
        HarnessError::RunFailed(value)
    }
}

fn run_failure_from_provider_error(err: &ProviderError) -> RunFailure {
    match err {
        ProviderError::Provider {
            provider, message, ..
        } => RunFailure::Provider {
            provider: provider.to_string(),
            message: message.clone(),
        },
        ProviderError::Transport { provider, message } => RunFailure::Transport {
            provider: provider.to_string(),
            message: message.clone(),
        },
        ProviderError::Protocol { provider, message } => RunFailure::Protocol {
            message: format!("provider={provider}: {message}"),
        },
    }
}
