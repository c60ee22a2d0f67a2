//! Built-in domain capabilities.
//!
//! Each submodule owns one partition's capabilities. [`builtin_registry`]
//! registers all of them under their partition so the loader can resolve a
//! bundle's declared names at startup.

pub mod customer_support;
pub mod horse_racing;

use serde_json::Value;

use domchat_core::capability::CapabilityRegistry;
use domchat_core::partition::Row;
use domchat_types::capability::CapabilitySpec;
use domchat_types::error::CapabilityError;

pub use customer_support::CUSTOMER_SUPPORT;
pub use horse_racing::HORSE_RACING;

/// Registry with every capability shipped in this crate.
pub fn builtin_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    horse_racing::register(&mut registry);
    customer_support::register(&mut registry);
    registry
}

fn spec(name: &str, description: &str, parameters: Value) -> CapabilitySpec {
    CapabilitySpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn execution_error(name: &str, reason: impl ToString) -> CapabilityError {
    CapabilityError::Execution {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn int_column(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or(0)
}
