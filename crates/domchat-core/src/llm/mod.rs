//! Generation backend abstractions for domchat.
//!
//! - `GenerationBackend`: the opaque model collaborator (object-safe)
//! - `StreamInSpan`: keeps a tracing span entered while a stream is polled

pub mod backend;
pub mod span;

pub use backend::{GenerationBackend, GenerationStream};
pub use span::StreamInSpan;
