use std::pin::Pin;

use bytes::Bytes;

use crate::errors::ProviderError;
use crate::model::{ModelRef, ProviderId, RunOptions};
use crate::request::ChatRequest;

/// Ordered event frames from one streaming call.
///
/// Each `Ok` item is exactly one frame. The stream ends when the source closes
/// cleanly; an `Err` item means the source failed mid-stream.
pub type FrameStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, ProviderError>> + Send + 'static>>;

/// Everything a frame source needs to open one stream.
#[derive(Clone, Debug)]
pub struct FrameRequest {
    pub run_id: uuid::Uuid,
    pub model: ModelRef,
    pub body: ChatRequest,
    pub options: RunOptions,
}

/// A connection to a hosted model that turns a request into event frames.
#[async_trait::async_trait]
pub trait FrameSource: Send + Sync {
    /// Returns the stable provider id of this source.
    fn id(&self) -> ProviderId;

    /// Sends the request and returns the frames of the response.
    async fn open_stream(&self, req: FrameRequest) -> Result<FrameStream, ProviderError>;
}
