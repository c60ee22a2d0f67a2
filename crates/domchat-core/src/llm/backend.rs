//! GenerationBackend trait definition.
//!
//! The model is an opaque collaborator: given instructions, capability specs
//! and a transcript, it streams text fragments and/or capability-call
//! requests and ends each round with `GenerationEvent::Done`.
//!
//! `stream` returns a boxed stream so the trait stays object-safe and the
//! runtime can hold `Arc<dyn GenerationBackend>` chosen at startup.

use std::pin::Pin;

use futures_util::Stream;

use domchat_types::llm::{GenerationEvent, GenerationRequest, LlmError};

/// Boxed event stream returned by [`GenerationBackend::stream`].
pub type GenerationStream =
    Pin<Box<dyn Stream<Item = Result<GenerationEvent, LlmError>> + Send + 'static>>;

/// Implementations live in domchat-infra (e.g. `OpenAiCompatibleBackend`).
pub trait GenerationBackend: Send + Sync {
    /// Human-readable backend name (e.g. "openai_compatible").
    fn name(&self) -> &str;

    /// Start one generation round.
    fn stream(&self, request: GenerationRequest) -> GenerationStream;
}
