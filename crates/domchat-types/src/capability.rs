//! Capability declarations exposed to the generation backend.

use serde::{Deserialize, Serialize};

/// The model-facing description of a callable capability.
///
/// `parameters` is a JSON Schema object describing the argument shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Outcome of one capability invocation, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub call_id: String,
    pub name: String,
    pub content: serde_json::Value,
    pub is_error: bool,
}
