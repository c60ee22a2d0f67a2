//! Wire protocol frames for the duplex chat channel.
//!
//! Client -> server: `{"message": "..."}`.
//! Server -> client: `{"type":"delta","content":"..."}`, `{"type":"done"}`
//! or `{"type":"error","message":"..."}`.

use serde::{Deserialize, Serialize};

/// One unit of the server -> client stream.
///
/// A turn is zero or more `Delta` frames followed by exactly one terminal
/// frame (`Done` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Delta { content: String },
    Done,
    Error { message: String },
}

impl StreamFrame {
    pub fn delta(content: impl Into<String>) -> Self {
        StreamFrame::Delta {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamFrame::Error {
            message: message.into(),
        }
    }

    /// Whether this frame ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done | StreamFrame::Error { .. })
    }
}

/// An inbound user message frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub message: String,
}
