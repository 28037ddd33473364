use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;
use crate::provider::{FrameRequest, FrameSource, FrameStream};

use super::ANTHROPIC_PROVIDER;
use super::config::AnthropicClientConfig;
use super::transport::{SseDecoder, sse_frame_to_event_frame};

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static>>;

/// Frame source backed by the Anthropic Messages API (streaming).
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicClientConfig,
}

impl AnthropicProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: AnthropicClientConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "Anthropic client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build Anthropic client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(AnthropicClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl FrameSource for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(ANTHROPIC_PROVIDER)
    }

    async fn open_stream(&self, req: FrameRequest) -> Result<FrameStream, ProviderError> {
        let provider_id = self.id();
        let body = build_request_body(&req)?;
        debug!(run_id = %req.run_id, model = %req.model.model, "starting Anthropic messages stream");

        let mut http_req = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &req.body.anthropic_version)
            .json(&body);
        if let Some(timeout) = req.options.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            ProviderError::transport(provider_id.clone(), format!("Anthropic request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("Anthropic messages request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(event_frame_stream(provider_id, bytes_stream)))
    }
}

/// Builds the wire body: the request without its version string (sent as a
/// header), plus the model and the streaming flag.
pub(crate) fn build_request_body(req: &FrameRequest) -> Result<serde_json::Value, ProviderError> {
    let mut body = serde_json::to_value(&req.body).map_err(|e| {
        ProviderError::protocol(
            ANTHROPIC_PROVIDER,
            format!("failed to serialize request body: {e}"),
        )
    })?;
    let Some(fields) = body.as_object_mut() else {
        return Err(ProviderError::protocol(
            ANTHROPIC_PROVIDER,
            "request body did not serialize to an object",
        ));
    };
    fields.remove("anthropic_version");
    fields.insert("model".into(), serde_json::json!(req.model.model));
    fields.insert("stream".into(), serde_json::json!(true));
    Ok(body)
}

fn event_frame_stream<S>(
    provider_id: ProviderId,
    bytes_stream: S,
) -> impl futures::Stream<Item = Result<Bytes, ProviderError>> + Send
where
    S: futures::Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    struct State<S> {
        provider_id: ProviderId,
        bytes_stream: S,
        decoder: SseDecoder,
        pending: VecDeque<Bytes>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for sse in state.decoder.push_chunk(&chunk) {
                            if let Some(frame) = sse_frame_to_event_frame(&state.provider_id, sse)? {
                                state.pending.push_back(frame);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("Anthropic streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        state.done = true;
                        if let Some(sse) = state.decoder.finish()
                            && let Some(frame) = sse_frame_to_event_frame(&state.provider_id, sse)?
                        {
                            state.pending.push_back(frame);
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Turn;
    use crate::aggregate::aggregate;
    use crate::model::{ModelRef, RunOptions};
    use crate::request::RequestDefaults;

    fn frame_request() -> FrameRequest {
        FrameRequest {
            run_id: uuid::Uuid::new_v4(),
            model: ModelRef::new(ANTHROPIC_PROVIDER, "claude-3-haiku-20240307"),
            body: RequestDefaults::default()
                .system("sys")
                .request(vec![Turn::user_text("hello")]),
            options: RunOptions::default(),
        }
    }

    fn chunks(parts: &[&'static str]) -> impl futures::Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn wire_body_moves_version_to_header_and_adds_model_and_stream() {
        let body = build_request_body(&frame_request()).expect("body");
        assert!(body.get("anthropic_version").is_none());
        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn empty_api_key_is_a_config_error() {
        assert!(matches!(
            AnthropicProvider::new(AnthropicClientConfig::new(" ")),
            Err(HarnessError::Config(_))
        ));
    }

    #[tokio::test]
    async fn sse_body_feeds_the_aggregator() {
        let frames = event_frame_stream(
            ProviderId::new(ANTHROPIC_PROVIDER),
            chunks(&[
                "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":9}}}\n\n",
                "event: ping\ndata: {\"type\": \"ping\"}\n\nevent: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi",
                " there\"}}\n\nevent: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ]),
        );
        let mut seen = Vec::new();
        let response = aggregate(frames, |t| seen.push(t.to_string()))
            .await
            .expect("response");
        assert_eq!(seen, vec!["Hi there"]);
        assert_eq!(response.id, "msg_1");
        assert_eq!(response.usage.input_tokens, 9);
        assert_eq!(response.usage.output_tokens, 3);
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn sse_error_event_fails_the_stream() {
        let frames = event_frame_stream(
            ProviderId::new(ANTHROPIC_PROVIDER),
            chunks(&[
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"a\"}}\n\n",
                "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
            ]),
        );
        let err = aggregate(frames, |_| {}).await.expect_err("error event");
        assert!(matches!(
            err,
            HarnessError::Provider(ProviderError::Provider { message, .. }) if message.contains("Overloaded")
        ));
    }

    #[tokio::test]
    async fn env_gated_smoke_stream_if_key_present() {
        if std::env::var("ANTHROPIC_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping Anthropic smoke test (ANTHROPIC_API_KEY missing)");
            return;
        }

        let client = crate::ChatClient::builder()
            .frame_source(std::sync::Arc::new(
                AnthropicProvider::from_env().expect("provider"),
            ))
            .model("claude-3-haiku-20240307")
            .options(RunOptions::default().timeout(std::time::Duration::from_secs(60)))
            .build()
            .expect("client");

        let body = RequestDefaults::default()
            .max_tokens(16)
            .request(vec![Turn::user_text("Reply with the single word: ok")]);
        let mut fragments = 0;
        let result = client.stream_turn(body, |_| fragments += 1).await;
        assert!(result.is_ok(), "Anthropic smoke failed: {result:?}");
        assert!(fragments > 0);
    }
}
