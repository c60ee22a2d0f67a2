//! Session runtime logic and port trait definitions for domchat.
//!
//! This crate defines the "ports" (configuration source, partition access,
//! conversation repository, generation backend) that the infrastructure
//! layer implements. It depends only on `domchat-types` -- never on
//! `domchat-infra` or any database/IO crate.

pub mod capability;
pub mod chat;
pub mod config;
pub mod llm;
pub mod partition;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
