use std::sync::Arc;

use tracing::{debug, info};

use crate::aggregate::{ChatResponse, aggregate};
use crate::errors::{HarnessError, RunFailure};
use crate::model::{ModelRef, RunOptions};
use crate::provider::{FrameRequest, FrameSource};
use crate::request::ChatRequest;

pub(crate) struct ClientInner {
    pub(crate) source: Arc<dyn FrameSource>,
    pub(crate) model: ModelRef,
    pub(crate) options: RunOptions,
}

/// Explicitly constructed handle to one hosted model.
///
/// Cloning is cheap; clones share the same frame source.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ChatClient {
    /// Starts a builder for wiring a frame source and model.
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::default()
    }

    /// Returns the model this client sends requests to.
    pub fn model(&self) -> &ModelRef {
        &self.inner.model
    }

    pub fn options(&self) -> &RunOptions {
        &self.inner.options
    }

    pub(crate) fn frame_request(&self, body: ChatRequest) -> FrameRequest {
        FrameRequest {
            run_id: uuid::Uuid::new_v4(),
            model: self.inner.model.clone(),
            body,
            options: self.inner.options.clone(),
        }
    }

    /// Sends one request and streams the reply.
    ///
    /// `on_fragment` is called in-line with each text delta; a slow callback
    /// slows consumption of the stream. Any failure, including the per-turn
    /// timeout, returns an error and no response.
    pub async fn stream_turn<F>(
        &self,
        body: ChatRequest,
        on_fragment: F,
    ) -> Result<ChatResponse, HarnessError>
    where
        F: FnMut(&str),
    {
        body.validate()?;
        let request = self.frame_request(body);
        let run_id = request.run_id;
        let timeout = request.options.timeout;
        debug!(run_id = %run_id, model = %self.inner.model.model, messages = request.body.messages.len(), "opening frame stream");

        let work = async {
            let frames = self.inner.source.open_stream(request).await?;
            aggregate(frames, on_fragment).await
        };
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| HarnessError::RunFailed(RunFailure::TimedOut))??,
            None => work.await?,
        };

        info!(
            run_id = %run_id,
            message_id = %response.id,
            stop_reason = ?response.stop_reason,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "turn completed"
        );
        Ok(response)
    }
}

/// Builder used to wire a frame source before creating a `ChatClient`.
#[derive(Default)]
pub struct ChatClientBuilder {
    source: Option<Arc<dyn FrameSource>>,
    model: Option<String>,
    options: RunOptions,
}

impl ChatClientBuilder {
    /// Sets the frame source every request is sent through.
    pub fn frame_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the provider-specific model name.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the client, validating that a source and model were provided.
    pub fn build(self) -> Result<ChatClient, HarnessError> {
        let source = self
            .source
            .ok_or_else(|| HarnessError::Config("a frame source is required".into()))?;
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| HarnessError::Config("model must not be empty".into()))?;
        if self.options.stream_buffer_capacity == 0 {
            return Err(HarnessError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(ChatClient {
            inner: Arc::new(ClientInner {
                model: ModelRef::new(source.id(), model),
                source,
                options: self.options,
            }),
        })
    }
}
