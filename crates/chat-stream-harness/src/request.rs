use crate::content::{Role, Turn};
use crate::errors::HarnessError;

/// Protocol version sent with every request unless overridden.
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
/// Output token budget used unless overridden.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Request body for one streaming inference call.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub anthropic_version: String,
    pub max_tokens: u32,
    /// Transcript snapshot, oldest turn first.
    pub messages: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl ChatRequest {
    /// Serializes the body as compact JSON.
    pub fn to_json(&self) -> Result<String, HarnessError> {
        serde_json::to_string(self)
            .map_err(|e| HarnessError::Validation(format!("failed to serialize request: {e}")))
    }

    /// Checks the invariants every frame source relies on.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.anthropic_version.trim().is_empty() {
            return Err(HarnessError::Validation(
                "anthropic_version must not be empty".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(HarnessError::Validation(
                "max_tokens must be greater than 0".into(),
            ));
        }
        match self.messages.last() {
            None => Err(HarnessError::Validation(
                "at least one message is required".into(),
            )),
            Some(turn) if turn.role() != Role::User => Err(HarnessError::Validation(
                "the last message must be a user turn".into(),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Request settings shared by every turn of a conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDefaults {
    pub anthropic_version: String,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
        }
    }
}

impl RequestDefaults {
    pub fn anthropic_version(mut self, version: impl Into<String>) -> Self {
        self.anthropic_version = version.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the system prompt. Blank prompts are dropped.
    pub fn system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = Some(system).filter(|s| !s.trim().is_empty());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn stop_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.stop_sequences.push(sequence.into());
        self
    }

    /// Builds a request body around the given messages.
    pub fn request(&self, messages: Vec<Turn>) -> ChatRequest {
        ChatRequest {
            anthropic_version: self.anthropic_version.clone(),
            max_tokens: self.max_tokens,
            messages,
            system: self.system.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            stop_sequences: self.stop_sequences.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_omits_unset_sampling_fields() {
        let body = RequestDefaults::default().request(vec![Turn::user_text("hello")]);
        let value: serde_json::Value =
            serde_json::from_str(&body.to_json().expect("json")).expect("parse");
        assert_eq!(
            value,
            serde_json::json!({
                "anthropic_version": "2023-06-01",
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": [{"type": "text", "text": "hello"}]}]
            })
        );
    }

    #[test]
    fn request_body_includes_configured_fields() {
        let body = RequestDefaults::default()
            .max_tokens(64)
            .system("be brief")
            .top_k(5)
            .stop_sequence("END")
            .request(vec![Turn::user_text("hi")]);
        let value = serde_json::to_value(&body).expect("json");
        assert_eq!(value["max_tokens"], 64);
        assert_eq!(value["system"], "be brief");
        assert_eq!(value["top_k"], 5);
        assert_eq!(value["stop_sequences"], serde_json::json!(["END"]));
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        assert_eq!(RequestDefaults::default().system("   ").system, None);
    }

    #[test]
    fn validate_requires_trailing_user_turn() {
        let defaults = RequestDefaults::default();
        assert!(matches!(
            defaults.request(Vec::new()).validate(),
            Err(HarnessError::Validation(msg)) if msg.contains("at least one message")
        ));
        assert!(matches!(
            defaults
                .request(vec![Turn::user_text("q"), Turn::assistant_text("a")])
                .validate(),
            Err(HarnessError::Validation(msg)) if msg.contains("user turn")
        ));
        assert!(defaults.request(vec![Turn::user_text("q")]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_token_budget() {
        let body = RequestDefaults::default()
            .max_tokens(0)
            .request(vec![Turn::user_text("q")]);
        assert!(matches!(body.validate(), Err(HarnessError::Validation(_))));
    }
}
