//! Common imports for typical harness usage.
pub use crate::{
    AbortHandle, ChatClient, ChatClientBuilder, ChatRequest, ChatResponse, ChatStream,
    ContentBlock, Conversation, HarnessError, ImageSource, RequestDefaults, Role, RunOptions,
    StreamEvent, Transcript, Turn, Usage,
};
