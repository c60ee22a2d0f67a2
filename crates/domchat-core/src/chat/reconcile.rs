//! Client-side transcript reconciliation.
//!
//! Folds the frame sequence of successive turns into an ordered, renderable
//! transcript. At most one assistant entry is provisional at a time, and it
//! is always the last entry. On reconnect the transcript is replaced
//! wholesale from stored history.

use serde::Serialize;
use uuid::Uuid;

use domchat_types::chat::{Message, MessageRole};
use domchat_types::frame::StreamFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Persisted, or completed by a `done` frame. Never mutated again.
    Final,
    /// An assistant answer still receiving deltas.
    Provisional,
    /// Placeholder left where a turn failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    /// Storage id, known only for entries loaded from history.
    pub id: Option<Uuid>,
    pub role: MessageRole,
    pub content: String,
    pub status: EntryStatus,
}

impl TranscriptEntry {
    pub fn is_error(&self) -> bool {
        self.status == EntryStatus::Failed
    }

    fn from_message(message: &Message) -> Self {
        Self {
            id: Some(message.id),
            role: message.role,
            content: message.content.clone(),
            status: EntryStatus::Final,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    #[serde(skip)]
    provisional: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(messages: &[Message]) -> Self {
        let mut transcript = Self::new();
        transcript.resync(messages);
        transcript
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn provisional(&self) -> Option<&TranscriptEntry> {
        self.provisional.map(|i| &self.entries[i])
    }

    /// True while an answer is streaming in.
    pub fn is_streaming(&self) -> bool {
        self.provisional.is_some()
    }

    /// Local echo of a message the user just sent.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.seal_provisional();
        self.entries.push(TranscriptEntry {
            id: None,
            role: MessageRole::User,
            content: content.into(),
            status: EntryStatus::Final,
        });
    }

    /// Apply one server frame.
    pub fn apply(&mut self, frame: &StreamFrame) {
        match frame {
            StreamFrame::Delta { content } => match self.provisional {
                Some(i) => self.entries[i].content.push_str(content),
                None => {
                    self.entries.push(TranscriptEntry {
                        id: None,
                        role: MessageRole::Assistant,
                        content: content.clone(),
                        status: EntryStatus::Provisional,
                    });
                    self.provisional = Some(self.entries.len() - 1);
                }
            },
            StreamFrame::Done => match self.provisional.take() {
                Some(i) => self.entries[i].status = EntryStatus::Final,
                // An answer with no text is still a stored message.
                None => self.entries.push(TranscriptEntry {
                    id: None,
                    role: MessageRole::Assistant,
                    content: String::new(),
                    status: EntryStatus::Final,
                }),
            },
            StreamFrame::Error { message } => {
                let placeholder = TranscriptEntry {
                    id: None,
                    role: MessageRole::Assistant,
                    content: message.clone(),
                    status: EntryStatus::Failed,
                };
                match self.provisional.take() {
                    Some(i) => self.entries[i] = placeholder,
                    None => self.entries.push(placeholder),
                }
            }
        }
    }

    /// Replace everything with stored history, dropping any in-flight state.
    pub fn resync(&mut self, messages: &[Message]) {
        self.entries = messages.iter().map(TranscriptEntry::from_message).collect();
        self.provisional = None;
    }

    /// Fold a frame sequence into this transcript.
    pub fn fold<'a>(mut self, frames: impl IntoIterator<Item = &'a StreamFrame>) -> Self {
        for frame in frames {
            self.apply(frame);
        }
        self
    }

    /// A provisional entry interrupted by something other than a terminal
    /// frame stays visible but is no longer appended to.
    fn seal_provisional(&mut self) {
        if let Some(i) = self.provisional.take() {
            self.entries[i].status = EntryStatus::Final;
        }
    }
}
