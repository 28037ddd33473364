use bytes::Bytes;

use crate::errors::ProviderError;
use crate::model::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Splits an SSE byte stream into frames, tolerating arbitrary chunk
/// boundaries.
///
/// `scanned` marks how far the buffer is known to hold no frame delimiter, so
/// a long frame arriving in many small chunks is scanned once.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    scanned: usize,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        // A delimiter can straddle the previous chunk end by up to 3 bytes.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((end, delim_len)) = frame_end(&self.buf, from) {
            let block: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();
            frames.extend(parse_block(&block));
            from = 0;
        }
        self.scanned = self.buf.len();
        frames
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.scanned = 0;
        parse_block(&std::mem::take(&mut self.buf))
    }
}

/// Position and length of the first blank-line delimiter at or after `from`.
fn frame_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

/// Parses one event block. Only `event` and `data` fields matter here; a
/// single space after the colon is dropped, comment lines are ignored.
fn parse_block(block: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(block);
    let mut event = None;
    let mut data: Option<String> = None;
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }
    if event.is_none() && data.is_none() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.unwrap_or_default(),
    })
}

/// Turns one SSE frame into an event frame for the decoder.
///
/// Frames without data (keep-alives) yield nothing. An `error` event ends the
/// stream as a provider failure.
pub(crate) fn sse_frame_to_event_frame(
    provider: &ProviderId,
    frame: SseFrame,
) -> Result<Option<Bytes>, ProviderError> {
    if frame.event.as_deref() == Some("error") {
        return Err(ProviderError::provider(
            provider.clone(),
            stream_error_message(&frame.data),
            None,
        ));
    }
    if frame.data.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(Bytes::from(frame.data)))
}

fn stream_error_message(data: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(data).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str());
    let kind = error.and_then(|e| e.get("type")).and_then(|v| v.as_str());
    match (kind, message) {
        (Some(kind), Some(message)) => format!("{kind}: {message}"),
        (None, Some(message)) => message.to_string(),
        _ if data.trim().is_empty() => "Anthropic stream error".to_string(),
        _ => data.to_string(),
    }
}
