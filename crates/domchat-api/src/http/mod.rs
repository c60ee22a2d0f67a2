//! HTTP/REST and WebSocket layer for domchat.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format and CORS
//! support, plus the `/ws/chat` streaming channel.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
