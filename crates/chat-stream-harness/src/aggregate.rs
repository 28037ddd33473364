//! Stream aggregation: turns decoded frames into a live text feed and one
//! finalized response.

use bytes::Bytes;
use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::content::{Role, Turn};
use crate::errors::{HarnessError, ProviderError};
use crate::event::{StreamRecord, decode_frame};

/// Token accounting reported by the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Final result of one streamed turn.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatResponse {
    /// Identifier from the first `message_start`, empty if none arrived.
    pub id: String,
    /// Model reported by the first `message_start`, empty if none arrived.
    pub model: String,
    pub role: Role,
    /// Every content delta, concatenated in arrival order.
    pub text: String,
    /// Stop reason from the last `message_delta`.
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl ChatResponse {
    /// Converts the response into the assistant turn appended to a transcript.
    pub fn into_turn(self) -> Turn {
        Turn::assistant_text(self.text)
    }
}

/// Running state of one streamed turn.
///
/// Owned by a single aggregation; discarded once finished or on error.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    id: Option<String>,
    model: String,
    text: String,
    stop_reason: Option<String>,
    usage: Usage,
    fragments: u64,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record into the state.
    pub fn apply(&mut self, record: StreamRecord) {
        match record {
            StreamRecord::MessageStart {
                id,
                model,
                input_tokens,
            } => {
                if let Some(existing) = &self.id {
                    warn!(first = %existing, repeated = %id, "repeated message_start ignored");
                    return;
                }
                debug!(message_id = %id, input_tokens, "message started");
                self.id = Some(id);
                self.model = model;
                self.usage.input_tokens = input_tokens;
            }
            StreamRecord::ContentDelta { text } => {
                self.fragments = self.fragments.saturating_add(1);
                self.text.push_str(&text);
            }
            StreamRecord::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                debug!(stop_reason = ?stop_reason, output_tokens, "message delta");
                self.stop_reason = stop_reason;
                self.usage.output_tokens = output_tokens;
            }
            StreamRecord::Unknown { tag } => {
                debug!(tag = %tag, "unknown event tag");
            }
        }
    }

    /// Decodes one frame and folds it into the state.
    ///
    /// Returns the fragment carried by a content delta so the caller can show
    /// it; every other kind yields `None`. Both the inline and the channel
    /// based runners go through here, so they fail the same way.
    pub fn apply_frame(&mut self, frame: &[u8]) -> Result<Option<String>, HarnessError> {
        let record = decode_frame(frame)?;
        let fragment = match &record {
            StreamRecord::ContentDelta { text } => Some(text.clone()),
            _ => None,
        };
        self.apply(record);
        Ok(fragment)
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of content deltas applied so far.
    pub fn fragments(&self) -> u64 {
        self.fragments
    }

    /// Snapshots the state into the finalized response.
    pub fn finish(self) -> ChatResponse {
        ChatResponse {
            id: self.id.unwrap_or_default(),
            model: self.model,
            role: Role::Assistant,
            text: self.text,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

/// Consumes a frame stream to its end.
///
/// `on_fragment` is called with each content delta, in arrival order, before
/// the next frame is read. Frames without a `type` are skipped like any other
/// unknown kind. A source error or an undecodable frame stops the
/// stream and is returned; the partial response is dropped.
pub async fn aggregate<S, F>(frames: S, mut on_fragment: F) -> Result<ChatResponse, HarnessError>
where
    S: futures::Stream<Item = Result<Bytes, ProviderError>>,
    F: FnMut(&str),
{
    let mut frames = std::pin::pin!(frames);
    let mut aggregator = StreamAggregator::new();
    while let Some(frame) = frames.next().await {
        if let Some(fragment) = aggregator.apply_frame(&frame?)? {
            on_fragment(&fragment);
        }
    }
    debug!(fragments = aggregator.fragments(), "frame stream closed");
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DecodeError;
    use futures::stream;

    fn frame(value: serde_json::Value) -> Result<Bytes, ProviderError> {
        Ok(Bytes::from(value.to_string()))
    }

    fn start(id: &str, input_tokens: u32) -> Result<Bytes, ProviderError> {
        frame(serde_json::json!({
            "type": "message_start",
            "message": {"id": id, "model": "claude-test", "usage": {"input_tokens": input_tokens}}
        }))
    }

    fn delta(text: &str) -> Result<Bytes, ProviderError> {
        frame(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text}
        }))
    }

    fn stop(reason: &str, output_tokens: u32) -> Result<Bytes, ProviderError> {
        frame(serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": reason},
            "usage": {"output_tokens": output_tokens}
        }))
    }

    fn unknown(tag: &str) -> Result<Bytes, ProviderError> {
        frame(serde_json::json!({"type": tag}))
    }

    async fn run(
        frames: Vec<Result<Bytes, ProviderError>>,
    ) -> (Result<ChatResponse, HarnessError>, Vec<String>) {
        let mut seen = Vec::new();
        let result = aggregate(stream::iter(frames), |text| seen.push(text.to_string())).await;
        (result, seen)
    }

    #[tokio::test]
    async fn hello_scenario_streams_and_finalizes() {
        let (result, seen) = run(vec![
            start("m1", 5),
            delta("Hel"),
            delta("lo"),
            stop("end_turn", 2),
        ])
        .await;
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(
            result.expect("response"),
            ChatResponse {
                id: "m1".into(),
                model: "claude-test".into(),
                role: Role::Assistant,
                text: "Hello".into(),
                stop_reason: Some("end_turn".into()),
                usage: Usage {
                    input_tokens: 5,
                    output_tokens: 2,
                },
            }
        );
    }

    #[tokio::test]
    async fn every_delta_reaches_the_sink_in_order() {
        let texts: Vec<String> = (0..50).map(|i| format!("<{i}>")).collect();
        let frames = texts.iter().map(|t| delta(t)).collect();
        let (result, seen) = run(frames).await;
        assert_eq!(seen, texts);
        assert_eq!(result.expect("response").text, texts.concat());
    }

    #[tokio::test]
    async fn empty_deltas_still_invoke_the_sink() {
        let (result, seen) = run(vec![delta("a"), delta(""), delta("b")]).await;
        assert_eq!(seen, vec!["a", "", "b"]);
        assert_eq!(result.expect("response").text, "ab");
    }

    #[tokio::test]
    async fn unknown_frames_do_not_change_the_result() {
        let plain = vec![start("m1", 3), delta("x"), delta("y"), stop("max_tokens", 9)];
        let noisy = vec![
            unknown("ping"),
            start("m1", 3),
            unknown("content_block_start"),
            delta("x"),
            unknown("ping"),
            delta("y"),
            unknown("content_block_stop"),
            stop("max_tokens", 9),
            unknown("message_stop"),
        ];
        let (plain_result, plain_seen) = run(plain).await;
        let (noisy_result, noisy_seen) = run(noisy).await;
        assert_eq!(plain_result.expect("plain"), noisy_result.expect("noisy"));
        assert_eq!(plain_seen, noisy_seen);
    }

    #[tokio::test]
    async fn untyped_frame_mid_stream_is_skipped() {
        let (result, seen) = run(vec![
            delta("Hel"),
            frame(serde_json::json!({"index": 0})),
            delta("lo"),
        ])
        .await;
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(result.expect("response").text, "Hello");
    }

    #[tokio::test]
    async fn first_start_and_last_delta_win() {
        let (result, _) = run(vec![
            start("first", 1),
            stop("max_tokens", 4),
            start("second", 7),
            stop("end_turn", 6),
        ])
        .await;
        let response = result.expect("response");
        assert_eq!(response.id, "first");
        assert_eq!(response.usage.input_tokens, 1);
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.output_tokens, 6);
    }

    #[tokio::test]
    async fn malformed_frame_fails_the_whole_stream() {
        let (result, seen) = run(vec![
            start("m1", 5),
            delta("partial"),
            Ok(Bytes::from_static(b"{not json")),
            delta("never"),
        ])
        .await;
        assert_eq!(seen, vec!["partial"]);
        assert!(matches!(
            result,
            Err(HarnessError::Decode(DecodeError::Malformed { .. }))
        ));
    }

    #[tokio::test]
    async fn source_error_stops_iteration() {
        let (result, seen) = run(vec![
            delta("a"),
            Err(ProviderError::transport("fake", "connection reset")),
            delta("b"),
        ])
        .await;
        assert_eq!(seen, vec!["a"]);
        assert!(matches!(
            result,
            Err(HarnessError::Provider(ProviderError::Transport { .. }))
        ));
    }

    #[tokio::test]
    async fn empty_stream_finalizes_empty_response() {
        let (result, seen) = run(Vec::new()).await;
        assert!(seen.is_empty());
        let response = result.expect("response");
        assert_eq!(response.id, "");
        assert_eq!(response.text, "");
        assert_eq!(response.stop_reason, None);
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn response_becomes_assistant_turn() {
        let mut aggregator = StreamAggregator::new();
        aggregator.apply(StreamRecord::ContentDelta { text: "hi".into() });
        assert_eq!(aggregator.text(), "hi");
        let turn = aggregator.finish().into_turn();
        assert_eq!(turn.role(), Role::Assistant);
        assert_eq!(turn.text(), "hi");
    }
}
