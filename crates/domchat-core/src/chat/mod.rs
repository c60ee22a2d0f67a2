//! Conversations and the streaming turn runtime.
//!
//! - `repository`: `ConversationRepository`, implemented in domchat-infra
//! - `service`: conversation management (CRUD, titles, history)
//! - `sequencer`: guards the per-turn frame ordering invariant
//! - `runtime`: the per-turn state machine that produces frames
//! - `reconcile`: the client-side fold of frames into a transcript

pub mod reconcile;
pub mod repository;
pub mod runtime;
pub mod sequencer;
pub mod service;
