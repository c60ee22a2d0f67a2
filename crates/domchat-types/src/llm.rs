//! Generation backend request and event types.
//!
//! The generation backend is an opaque collaborator: given instructions,
//! capability specs and a transcript, it streams either text fragments or
//! capability-call requests, terminated by an explicit `Done` marker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::CapabilitySpec;
use crate::chat::{Message, MessageRole};

/// A request for the model to invoke a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in the model context for a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ContextMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        capability_calls: Vec<CapabilityCall>,
    },
    CapabilityResult {
        call_id: String,
        name: String,
        content: String,
    },
}

impl ContextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ContextMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ContextMessage::Assistant {
            content: content.into(),
            capability_calls: Vec::new(),
        }
    }
}

impl From<&Message> for ContextMessage {
    fn from(message: &Message) -> Self {
        match message.role {
            MessageRole::User => ContextMessage::user(message.content.clone()),
            MessageRole::Assistant => ContextMessage::assistant(message.content.clone()),
        }
    }
}

/// Everything the backend needs for one generation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub instructions: String,
    pub capabilities: Vec<CapabilitySpec>,
    pub transcript: Vec<ContextMessage>,
}

/// Events streamed back by the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A fragment of answer text, in arrival order.
    TextDelta { text: String },
    /// The model wants a capability invoked before it continues.
    CapabilityCall(CapabilityCall),
    /// End of this generation round.
    Done,
}

/// Errors from generation backends.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("backend not configured: {0}")]
    NotConfigured(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_message_role_tag() {
        let json = serde_json::to_value(ContextMessage::user("hi")).unwrap();
        assert_eq!(json["role"], "user");

        let json = serde_json::to_value(ContextMessage::CapabilityResult {
            call_id: "c1".to_string(),
            name: "lookup".to_string(),
            content: "{}".to_string(),
        })
        .unwrap();
        assert_eq!(json["role"], "capability_result");
    }

    #[test]
    fn test_generation_event_tags() {
        let json = serde_json::to_value(GenerationEvent::TextDelta {
            text: "a".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "text_delta");
        let json = serde_json::to_value(GenerationEvent::Done).unwrap();
        assert_eq!(json["type"], "done");
    }
}
