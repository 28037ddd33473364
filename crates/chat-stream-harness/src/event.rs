//! Frame decoding.
//!
//! Every frame delivered by a [`FrameSource`](crate::provider::FrameSource) is
//! one JSON object whose `type` field selects the event kind. Only three kinds
//! carry data the aggregator needs; everything else is passed through as
//! [`StreamRecord::Unknown`].

use serde::de::DeserializeOwned;

use crate::errors::DecodeError;

/// Discriminant of the frame that opens a message.
pub const MESSAGE_START: &str = "message_start";
/// Discriminant of a frame carrying an incremental text fragment.
pub const CONTENT_BLOCK_DELTA: &str = "content_block_delta";
/// Discriminant of the frame carrying the stop reason and output usage.
pub const MESSAGE_DELTA: &str = "message_delta";

/// One decoded event frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamRecord {
    /// `message_start`: response identity and prompt usage.
    MessageStart {
        id: String,
        model: String,
        input_tokens: u32,
    },
    /// `content_block_delta`: the next text fragment.
    ContentDelta { text: String },
    /// `message_delta`: why generation stopped and how much it produced.
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u32,
    },
    /// Any other discriminant.
    Unknown { tag: String },
}

impl StreamRecord {
    /// Returns the wire discriminant this record was decoded from.
    pub fn tag(&self) -> &str {
        match self {
            Self::MessageStart { .. } => MESSAGE_START,
            Self::ContentDelta { .. } => CONTENT_BLOCK_DELTA,
            Self::MessageDelta { .. } => MESSAGE_DELTA,
            Self::Unknown { tag } => tag,
        }
    }
}

#[derive(serde::Deserialize, Default)]
struct UsageFields {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(serde::Deserialize)]
struct MessageStartFrame {
    #[serde(default)]
    message: Option<StartedMessage>,
}

#[derive(serde::Deserialize)]
struct StartedMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<UsageFields>,
}

#[derive(serde::Deserialize)]
struct ContentDeltaFrame {
    #[serde(default)]
    delta: Option<TextDelta>,
}

#[derive(serde::Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct MessageDeltaFrame {
    #[serde(default)]
    delta: Option<StopDelta>,
    #[serde(default)]
    usage: Option<UsageFields>,
}

#[derive(serde::Deserialize)]
struct StopDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Decodes exactly one frame.
///
/// Missing optional fields decode to empty values, and an object without a
/// `type` is an [`StreamRecord::Unknown`] with an empty tag. Bytes that are not
/// a JSON object, a `type` that is not a string, or a known kind whose fields
/// have the wrong shape, are a [`DecodeError`].
pub fn decode_frame(bytes: &[u8]) -> Result<StreamRecord, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::malformed(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(DecodeError::malformed("expected a JSON object"));
    }
    let tag = match value.get("type") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(tag)) => tag.clone(),
        Some(other) => {
            return Err(DecodeError::malformed(format!(
                "`type` must be a string, got {other}"
            )));
        }
    };

    match tag.as_str() {
        MESSAGE_START => {
            let frame: MessageStartFrame = payload(value, &tag)?;
            let (id, model, usage) = match frame.message {
                Some(message) => (message.id, message.model, message.usage),
                None => (None, None, None),
            };
            Ok(StreamRecord::MessageStart {
                id: id.unwrap_or_default(),
                model: model.unwrap_or_default(),
                input_tokens: usage.unwrap_or_default().input_tokens.unwrap_or(0),
            })
        }
        CONTENT_BLOCK_DELTA => {
            let frame: ContentDeltaFrame = payload(value, &tag)?;
            Ok(StreamRecord::ContentDelta {
                text: frame.delta.and_then(|d| d.text).unwrap_or_default(),
            })
        }
        MESSAGE_DELTA => {
            let frame: MessageDeltaFrame = payload(value, &tag)?;
            Ok(StreamRecord::MessageDelta {
                stop_reason: frame.delta.and_then(|d| d.stop_reason),
                output_tokens: frame.usage.unwrap_or_default().output_tokens.unwrap_or(0),
            })
        }
        _ => Ok(StreamRecord::Unknown { tag }),
    }
}

fn payload<T: DeserializeOwned>(value: serde_json::Value, tag: &str) -> Result<T, DecodeError> {
    serde_json::from_value(value)
        .map_err(|e| DecodeError::malformed(format!("invalid `{tag}` frame: {e}")))
}
