//! Logging and trace export setup for domchat binaries.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, otel_requested, shutdown_tracing};
