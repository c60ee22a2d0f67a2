//! OpenAI-compatible generation backend.
//!
//! Talks to any server exposing the Chat Completions API (`/chat/completions`)
//! with streaming and function tools. The base URL and model come from the
//! `llm` section of the application document.

pub mod streaming;
pub mod types;

use std::time::Duration;

use secrecy::SecretString;

use domchat_core::llm::{GenerationBackend, GenerationStream};
use domchat_types::llm::{ContextMessage, GenerationRequest, LlmError};

use self::streaming::create_chat_stream;
use self::types::{ChatFunction, ChatFunctionCall, ChatMessage, ChatRequest, ChatTool, ChatToolCall};

/// Streaming backend for OpenAI-compatible endpoints.
///
/// Does NOT derive Debug: the API key lives in a [`SecretString`] and is
/// exposed only when the request header is built.
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Convert a [`GenerationRequest`] into a streaming Chat Completions body.
pub fn to_chat_request(request: &GenerationRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.transcript.len() + 1);
    if !request.instructions.trim().is_empty() {
        messages.push(ChatMessage::System {
            content: request.instructions.clone(),
        });
    }

    for entry in &request.transcript {
        messages.push(match entry {
            ContextMessage::User { content } => ChatMessage::User {
                content: content.clone(),
            },
            ContextMessage::Assistant {
                content,
                capability_calls,
            } => ChatMessage::Assistant {
                content: content.clone(),
                tool_calls: capability_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: call.id.clone(),
                        kind: "function",
                        function: ChatFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
            },
            ContextMessage::CapabilityResult {
                call_id, content, ..
            } => ChatMessage::Tool {
                tool_call_id: call_id.clone(),
                content: content.clone(),
            },
        });
    }

    let tools = request
        .capabilities
        .iter()
        .map(|spec| ChatTool {
            kind: "function",
            function: ChatFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        })
        .collect();

    ChatRequest {
        model: request.model.clone(),
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: true,
        tools,
    }
}

impl GenerationBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    fn stream(&self, request: GenerationRequest) -> GenerationStream {
        let body = to_chat_request(&request);
        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "starting chat completion stream"
        );
        create_chat_stream(self.client.clone(), self.url(), body, self.api_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domchat_types::capability::CapabilitySpec;
    use domchat_types::llm::CapabilityCall;

    fn request(transcript: Vec<ContextMessage>) -> GenerationRequest {
        GenerationRequest {
            model: "gpt-4o".into(),
            temperature: 0.2,
            max_tokens: 512,
            instructions: "You are a racing analyst.".into(),
            capabilities: vec![CapabilitySpec {
                name: "get_race_statistics".into(),
                description: "Stats for a race".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
            transcript,
        }
    }

    #[test]
    fn test_request_maps_roles_and_tools() {
        let call = CapabilityCall {
            id: "call_1".into(),
            name: "get_race_statistics".into(),
            arguments: serde_json::json!({"race_name": "Arima Kinen"}),
        };
        let body = to_chat_request(&request(vec![
            ContextMessage::user("Who wins?"),
            ContextMessage::Assistant {
                content: String::new(),
                capability_calls: vec![call],
            },
            ContextMessage::CapabilityResult {
                call_id: "call_1".into(),
                name: "get_race_statistics".into(),
                content: r#"{"rows":[]}"#.into(),
            },
        ]));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["model"], "gpt-4o");

        let messages = json["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(messages[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"race_name":"Arima Kinen"}"#
        );
        assert_eq!(messages[3]["tool_call_id"], "call_1");

        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "get_race_statistics");
    }

    #[test]
    fn test_blank_instructions_and_no_tools_are_omitted() {
        let mut req = request(vec![ContextMessage::user("hi")]);
        req.instructions = "  ".into();
        req.capabilities.clear();

        let json = serde_json::to_value(to_chat_request(&req)).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert!(json.get("tools").is_none());
        assert!(json["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend =
            OpenAiCompatibleBackend::new(SecretString::from("sk-test"), "http://localhost:8080/v1/")
                .unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8080/v1");
        assert_eq!(backend.url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(backend.name(), "openai_compatible");
    }
}
