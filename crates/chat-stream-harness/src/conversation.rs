use crate::aggregate::ChatResponse;
use crate::client::ChatClient;
use crate::content::{ContentBlock, Role, Transcript, Turn};
use crate::errors::HarnessError;
use crate::request::{ChatRequest, RequestDefaults};

/// A multi-turn exchange with one model.
///
/// The transcript only grows: a turn is committed together with its reply
/// once the reply has streamed to completion. A failed turn leaves the
/// transcript untouched so it can be sent again.
pub struct Conversation {
    client: ChatClient,
    defaults: RequestDefaults,
    transcript: Transcript,
}

impl Conversation {
    /// Starts an empty conversation.
    pub fn new(client: ChatClient, defaults: RequestDefaults) -> Self {
        Self {
            client,
            defaults,
            transcript: Transcript::new(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// Builds the request body that `send_turn` would send for `turn`.
    pub fn request_for(&self, turn: &Turn) -> ChatRequest {
        let mut messages = self.transcript.turns().to_vec();
        messages.push(turn.clone());
        self.defaults.request(messages)
    }

    /// Sends a user turn and streams the reply through `on_fragment`.
    pub async fn send_turn<F>(
        &mut self,
        turn: Turn,
        on_fragment: F,
    ) -> Result<ChatResponse, HarnessError>
    where
        F: FnMut(&str),
    {
        validate_user_turn(&turn)?;
        let request = self.request_for(&turn);
        self.send_request(turn, request, on_fragment).await
    }

    /// Sends a user turn using a request body the caller already built
    /// (for example after printing it).
    ///
    /// `request` must be the body returned by `request_for(&turn)`.
    pub async fn send_request<F>(
        &mut self,
        turn: Turn,
        request: ChatRequest,
        on_fragment: F,
    ) -> Result<ChatResponse, HarnessError>
    where
        F: FnMut(&str),
    {
        validate_user_turn(&turn)?;
        if request.messages.last() != Some(&turn) {
            return Err(HarnessError::Validation(
                "request does not end with the turn being sent".into(),
            ));
        }
        let response = self.client.stream_turn(request, on_fragment).await?;
        self.transcript.push(turn);
        self.transcript.push(response.clone().into_turn());
        Ok(response)
    }
}

fn validate_user_turn(turn: &Turn) -> Result<(), HarnessError> {
    if turn.role() != Role::User {
        return Err(HarnessError::Validation(
            "only user turns can be sent".into(),
        ));
    }
    if turn.content().is_empty() {
        return Err(HarnessError::Validation(
            "a turn needs at least one content block".into(),
        ));
    }
    for block in turn.content() {
        if let ContentBlock::Text { text } = block
            && text.trim().is_empty()
        {
            return Err(HarnessError::Validation(
                "text input must not be empty".into(),
            ));
        }
    }
    Ok(())
}
