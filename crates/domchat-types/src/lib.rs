//! Shared domain types for domchat.
//!
//! This crate contains the data model shared by every layer of the session
//! runtime: configuration bundles, conversations and messages, stream frames,
//! capability specs, generation requests, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod bundle;
pub mod capability;
pub mod chat;
pub mod config;
pub mod error;
pub mod frame;
pub mod llm;
