use crate::{aggregate::ChatResponse, errors::RunFailure, model::ProviderId};

/// Normalized events exposed by `ChatStream`.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// First event for every run.
    Started {
        run_id: uuid::Uuid,
        provider: ProviderId,
        model: String,
    },
    /// Incremental text fragment, numbered from zero.
    TextDelta {
        run_id: uuid::Uuid,
        seq: u64,
        text: String,
    },
    /// Terminal success event with the finalized response.
    Completed {
        run_id: uuid::Uuid,
        response: ChatResponse,
    },
    /// Terminal failure event.
    Error {
        run_id: uuid::Uuid,
        error: RunFailure,
    },
}
