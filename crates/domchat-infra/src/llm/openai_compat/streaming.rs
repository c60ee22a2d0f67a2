//! Chat Completions SSE stream to [`GenerationEvent`] adapter.
//!
//! Each `data:` line carries one JSON chunk; the literal `[DONE]` ends the
//! round. Tool call arguments arrive as partial JSON fragments keyed by the
//! tool call index. They are accumulated and emitted as
//! [`GenerationEvent::CapabilityCall`]s once the model finishes, followed by
//! [`GenerationEvent::Done`].

use std::collections::BTreeMap;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use domchat_core::llm::GenerationStream;
use domchat_types::llm::{CapabilityCall, GenerationEvent, LlmError};

use super::types::{ChatChunk, ChatRequest};

const DONE_MARKER: &str = "[DONE]";

/// Accumulates partial tool call fragments during streaming.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

/// Per-round parser state, independent of the transport.
#[derive(Debug, Default)]
pub(crate) struct ChunkParser {
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl ChunkParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` was seen.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one `data:` payload, returning the events it completes.
    pub(crate) fn push(&mut self, data: &str) -> Result<Vec<GenerationEvent>, LlmError> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == DONE_MARKER {
            return self.finish();
        }

        let chunk: ChatChunk = serde_json::from_str(data)
            .map_err(|e| LlmError::Deserialization(format!("invalid stream chunk: {e}")))?;

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(GenerationEvent::TextDelta { text });
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    acc.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        acc.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        acc.json_buffer.push_str(&arguments);
                    }
                }
            }
        }
        Ok(events)
    }

    /// Flush accumulated calls in index order, then `Done`.
    ///
    /// Also used when the connection ends without a `[DONE]` line.
    pub(crate) fn finish(&mut self) -> Result<Vec<GenerationEvent>, LlmError> {
        self.finished = true;
        let mut events = Vec::with_capacity(self.tool_calls.len() + 1);
        for (index, acc) in std::mem::take(&mut self.tool_calls) {
            if acc.name.is_empty() {
                return Err(LlmError::Deserialization(format!(
                    "tool call {index} has no function name"
                )));
            }
            let arguments = if acc.json_buffer.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&acc.json_buffer).map_err(|e| {
                    LlmError::Deserialization(format!("tool call JSON for '{}': {e}", acc.name))
                })?
            };
            let id = if acc.id.is_empty() {
                format!("call_{index}")
            } else {
                acc.id
            };
            events.push(GenerationEvent::CapabilityCall(CapabilityCall {
                id,
                name: acc.name,
                arguments,
            }));
        }
        events.push(GenerationEvent::Done);
        Ok(events)
    }
}

/// Pass a successful response through; map any other status to an error,
/// consuming the body for the message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, body = %error_body, "Chat completions error response");
    Err(match status.as_u16() {
        401 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited { retry_after_ms: None },
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {error_body}"),
        },
    })
}

/// Open a streaming connection and adapt it to [`GenerationEvent`]s.
///
/// Connection and HTTP status errors surface as the first stream item.
pub fn create_chat_stream(
    client: reqwest::Client,
    url: String,
    body: ChatRequest,
    api_key: SecretString,
) -> GenerationStream {
    Box::pin(async_stream::try_stream! {
        let response = client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let response = check_status(response).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut parser = ChunkParser::new();

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            for item in parser.push(&event.data)? {
                yield item;
            }
            if parser.is_finished() {
                break;
            }
        }

        if !parser.is_finished() {
            tracing::debug!(url = %url, "stream ended without [DONE] marker");
            for item in parser.finish()? {
                yield item;
            }
        }
    })
}
