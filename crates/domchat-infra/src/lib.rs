//! Infrastructure layer for domchat.
//!
//! Implements the ports defined in `domchat-core`: SQLite storage with one
//! attached database per partition, the filesystem configuration source,
//! the OpenAI-compatible generation backend, and the built-in domain
//! capabilities.

pub mod capability;
pub mod config;
pub mod llm;
pub mod sqlite;
