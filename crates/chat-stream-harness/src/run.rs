use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::aggregate::{ChatResponse, StreamAggregator};
use crate::client::ChatClient;
use crate::errors::{HarnessError, RunFailure};
use crate::model::ProviderId;
use crate::provider::{FrameRequest, FrameSource};
use crate::request::ChatRequest;
use crate::stream::StreamEvent;

/// Handle used to request cancellation of a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Cancellation is best-effort and becomes visible as a terminal
    /// `StreamEvent::Error` with `RunFailure::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

impl ChatClient {
    /// Starts a turn on a background task and returns its event channel.
    ///
    /// Fragments are forwarded over a bounded channel, so a consumer that
    /// stops reading holds back the stream.
    pub async fn start_stream(&self, body: ChatRequest) -> Result<ChatStream, HarnessError> {
        body.validate()?;
        let request = self.frame_request(body);

        let (tx, rx) = mpsc::channel(request.options.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let abort_handle = AbortHandle { tx: abort_tx };
        let run_id = request.run_id;
        let model = request.model.clone();
        tokio::spawn(run_task(
            self.inner.source.clone(),
            request,
            tx,
            final_tx,
            abort_rx,
        ));

        Ok(ChatStream {
            run_id,
            provider: model.provider,
            model: model.model,
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        })
    }
}

/// Streaming handle returned by `ChatClient::start_stream`.
///
/// Use `next_event()` to consume events as they arrive and `finish()` to obtain
/// the finalized response after the terminal event.
pub struct ChatStream {
    run_id: uuid::Uuid,
    provider: ProviderId,
    model: String,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<ChatResponse, HarnessError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl ChatStream {
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next stream event.
    ///
    /// Returns `None` after the stream channel is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if let Some(StreamEvent::Completed { .. } | StreamEvent::Error { .. }) = &event {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains the stream (if needed) and returns the terminal result.
    ///
    /// This is safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<ChatResponse, HarnessError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(StreamEvent::Completed { .. } | StreamEvent::Error { .. }) => {
                    self.saw_terminal = true;
                }
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::protocol_msg(format!(
                "run task ended without final result (provider={}, model={})",
                self.provider, self.model
            ))),
        }
    }
}

async fn run_task(
    source: Arc<dyn FrameSource>,
    request: FrameRequest,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<ChatResponse, HarnessError>>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let run_id = request.run_id;
    let deadline = request.options.timeout.map(|t| Instant::now() + t);

    if !send_event(
        &tx,
        StreamEvent::Started {
            run_id,
            provider: request.model.provider.clone(),
            model: request.model.model.clone(),
        },
    )
    .await
    {
        let _ = final_tx.send(Err(HarnessError::protocol_msg(
            "run stream receiver dropped before Started",
        )));
        return;
    }

    let opened = tokio::select! {
        biased;
        _ = wait_for_abort(&mut abort_rx) => Err(HarnessError::from(RunFailure::Cancelled)),
        _ = wait_for_deadline(deadline) => Err(HarnessError::from(RunFailure::TimedOut)),
        opened = source.open_stream(request) => opened.map_err(HarnessError::from),
    };
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(err) => return fail(&tx, final_tx, run_id, err).await,
    };

    let mut seq = 0_u64;
    let mut aggregator = StreamAggregator::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = wait_for_abort(&mut abort_rx) => {
                return fail(&tx, final_tx, run_id, RunFailure::Cancelled.into()).await;
            }
            _ = wait_for_deadline(deadline) => {
                return fail(&tx, final_tx, run_id, RunFailure::TimedOut.into()).await;
            }
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return fail(&tx, final_tx, run_id, err.into()).await,
            None => {
                let response = aggregator.finish();
                let sent = send_event(
                    &tx,
                    StreamEvent::Completed {
                        run_id,
                        response: response.clone(),
                    },
                )
                .await;
                let _ = final_tx.send(if sent {
                    Ok(response)
                } else {
                    Err(HarnessError::protocol_msg(
                        "run stream receiver dropped before completion",
                    ))
                });
                return;
            }
        };

        let text = match aggregator.apply_frame(&frame) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(err) => return fail(&tx, final_tx, run_id, err).await,
        };
        debug!(run_id = %run_id, seq, "text delta");
        let delta = StreamEvent::TextDelta { run_id, seq, text };
        seq = seq.saturating_add(1);

        // A full channel must not hold off cancellation or the deadline.
        let sent = tokio::select! {
            biased;
            _ = wait_for_abort(&mut abort_rx) => {
                return fail(&tx, final_tx, run_id, RunFailure::Cancelled.into()).await;
            }
            _ = wait_for_deadline(deadline) => {
                return fail(&tx, final_tx, run_id, RunFailure::TimedOut.into()).await;
            }
            sent = send_event(&tx, delta) => sent,
        };
        if !sent {
            let _ = final_tx.send(Err(HarnessError::protocol_msg(
                "run stream receiver dropped during output",
            )));
            return;
        }
    }
}

/// Ends the run with `err`.
///
/// The terminal event carries the normalized failure; `finish` returns `err`
/// itself, matching what `ChatClient::stream_turn` returns. Cancellation and
/// timeouts do not wait for room in the channel, so a consumer that stopped
/// reading may only see the failure through `finish`.
async fn fail(
    tx: &mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<ChatResponse, HarnessError>>,
    run_id: uuid::Uuid,
    err: HarnessError,
) {
    let failure = err.to_run_failure();
    debug!(run_id = %run_id, error = %failure, "run failed");
    let event = StreamEvent::Error {
        run_id,
        error: failure.clone(),
    };
    if matches!(failure, RunFailure::Cancelled | RunFailure::TimedOut) {
        let _ = tx.try_send(event);
    } else {
        let _ = send_event(tx, event).await;
    }
    let _ = final_tx.send(Err(err));
}

/// Resolves once an abort was requested. Never resolves when every abort
/// handle is gone.
async fn wait_for_abort(abort_rx: &mut watch::Receiver<bool>) {
    let aborted = abort_rx.wait_for(|aborted| *aborted).await.is_ok();
    if !aborted {
        std::future::pending::<()>().await;
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DecodeError, ProviderError};
    use crate::model::RunOptions;
    use crate::provider::FrameStream;
    use crate::request::RequestDefaults;
    use crate::Turn;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;

    enum Behavior {
        ImmediateError(ProviderError),
        Frames(Vec<Result<Bytes, ProviderError>>),
        Pending,
    }

    struct FakeSource {
        behavior: Behavior,
    }

    #[async_trait::async_trait]
    impl FrameSource for FakeSource {
        fn id(&self) -> ProviderId {
            ProviderId::new("fake")
        }

        async fn open_stream(&self, _req: FrameRequest) -> Result<FrameStream, ProviderError> {
            match &self.behavior {
                Behavior::ImmediateError(err) => Err(err.clone()),
                Behavior::Frames(frames) => Ok(Box::pin(stream::iter(frames.clone()))),
                Behavior::Pending => Ok(Box::pin(stream::pending::<Result<Bytes, ProviderError>>())),
            }
        }
    }

    fn client(behavior: Behavior, options: RunOptions) -> ChatClient {
        ChatClient::builder()
            .frame_source(Arc::new(FakeSource { behavior }))
            .model("model-a")
            .options(options)
            .build()
            .expect("client")
    }

    fn frames(raw: &[&str]) -> Behavior {
        Behavior::Frames(
            raw.iter()
                .map(|f| Ok(Bytes::from(f.to_string())))
                .collect(),
        )
    }

    fn body() -> ChatRequest {
        RequestDefaults::default().request(vec![Turn::user_text("hello")])
    }

    #[tokio::test]
    async fn emits_started_deltas_and_completed_in_order() {
        let mut stream = client(
            frames(&[
                r#"{"type":"message_start","message":{"id":"m1","usage":{"input_tokens":5}}}"#,
                r#"{"type":"content_block_delta","delta":{"text":"Hel"}}"#,
                r#"{"type":"ping"}"#,
                r#"{"type":"content_block_delta","delta":{"text":"lo"}}"#,
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            ]),
            RunOptions::default(),
        )
        .start_stream(body())
        .await
        .expect("start");

        let first = stream.next_event().await.expect("first event");
        assert!(matches!(first, StreamEvent::Started { .. }));

        let mut deltas = Vec::new();
        let mut saw_terminal = false;
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::TextDelta { seq, text, .. } => deltas.push((seq, text)),
                StreamEvent::Completed { .. } => {
                    saw_terminal = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_terminal);
        assert_eq!(deltas, vec![(0, "Hel".to_string()), (1, "lo".to_string())]);

        let response = stream.finish().await.expect("finish");
        assert_eq!(response.text, "Hello");
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[tokio::test]
    async fn malformed_frame_fails_like_stream_turn() {
        let raw = [r#"{"type":"content_block_delta","delta":{"text":"a"}}"#, "nope"];
        let inline = client(frames(&raw), RunOptions::default())
            .stream_turn(body(), |_| {})
            .await
            .expect_err("inline decode error");

        let mut stream = client(frames(&raw), RunOptions::default())
            .start_stream(body())
            .await
            .expect("start");
        let mut terminal = None;
        while let Some(event) = stream.next_event().await {
            if let StreamEvent::Error { error, .. } = event {
                terminal = Some(error);
            }
        }
        assert!(matches!(terminal, Some(RunFailure::Decode { .. })));

        let streamed = stream.finish().await.expect_err("streamed decode error");
        assert!(matches!(streamed, HarnessError::Decode(DecodeError::Malformed { .. })));
        assert_eq!(streamed, inline);
    }

    #[tokio::test]
    async fn open_error_becomes_terminal_provider_failure() {
        let mut stream = client(
            Behavior::ImmediateError(ProviderError::provider("fake", "overloaded", Some(529))),
            RunOptions::default(),
        )
        .start_stream(body())
        .await
        .expect("start");

        let mut saw_error = false;
        while let Some(event) = stream.next_event().await {
            if matches!(event, StreamEvent::Error { .. }) {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        assert!(matches!(
            stream.finish().await,
            Err(HarnessError::Provider(ProviderError::Provider {
                status_code: Some(529),
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn cancellation_emits_terminal_error() {
        let mut stream = client(Behavior::Pending, RunOptions::default())
            .start_stream(body())
            .await
            .expect("start");

        let abort = stream.abort_handle();
        let _ = stream.next_event().await;
        abort.abort();

        let mut saw_cancel = false;
        while let Some(event) = stream.next_event().await {
            if let StreamEvent::Error {
                error: RunFailure::Cancelled,
                ..
            } = event
            {
                saw_cancel = true;
                break;
            }
        }
        assert!(saw_cancel);
        assert!(matches!(
            stream.finish().await,
            Err(HarnessError::RunFailed(RunFailure::Cancelled))
        ));
    }

    #[tokio::test]
    async fn deadline_emits_timed_out() {
        let stream = client(
            Behavior::Pending,
            RunOptions::default().timeout(Duration::from_millis(20)),
        )
        .start_stream(body())
        .await
        .expect("start");
        assert!(matches!(
            stream.finish().await,
            Err(HarnessError::RunFailed(RunFailure::TimedOut))
        ));
    }

    fn many_deltas(count: usize) -> Behavior {
        let raw: Vec<String> = (0..count)
            .map(|i| format!(r#"{{"type":"content_block_delta","delta":{{"text":"{i}"}}}}"#))
            .collect();
        let refs: Vec<&str> = raw.iter().map(String::as_str).collect();
        frames(&refs)
    }

    #[tokio::test]
    async fn stalled_consumer_can_still_cancel() {
        let stream = client(
            many_deltas(10),
            RunOptions::default().stream_buffer_capacity(1),
        )
        .start_stream(body())
        .await
        .expect("start");

        // Let the run fill the channel and block on the next delta.
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.abort_handle().abort();

        let result = tokio::time::timeout(Duration::from_secs(1), stream.finish())
            .await
            .expect("finish returns");
        assert_eq!(result, Err(HarnessError::RunFailed(RunFailure::Cancelled)));
    }

    #[tokio::test]
    async fn stalled_consumer_still_times_out() {
        let stream = client(
            many_deltas(10),
            RunOptions::default()
                .stream_buffer_capacity(1)
                .timeout(Duration::from_millis(30)),
        )
        .start_stream(body())
        .await
        .expect("start");

        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = tokio::time::timeout(Duration::from_secs(1), stream.finish())
            .await
            .expect("finish returns");
        assert_eq!(result, Err(HarnessError::RunFailed(RunFailure::TimedOut)));
    }

    #[tokio::test]
    async fn small_buffer_still_delivers_every_fragment() {
        let raw: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"type":"content_block_delta","delta":{{"text":"{i},"}}}}"#))
            .collect();
        let refs: Vec<&str> = raw.iter().map(String::as_str).collect();
        let mut stream = client(
            frames(&refs),
            RunOptions::default().stream_buffer_capacity(1),
        )
        .start_stream(body())
        .await
        .expect("start");

        let mut joined = String::new();
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::TextDelta { text, .. } => joined.push_str(&text),
                StreamEvent::Completed { .. } => break,
                _ => {}
            }
        }
        let expected: String = (0..20).map(|i| format!("{i},")).collect();
        assert_eq!(joined, expected);
        assert_eq!(stream.finish().await.expect("finish").text, expected);
    }
}
