//! HTTP request handlers for the REST API and the chat channel.

pub mod bundle;
pub mod conversation;
pub mod ws;
