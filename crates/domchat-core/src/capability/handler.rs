//! Capability trait definition.

use serde::de::DeserializeOwned;
use serde_json::Value;

use domchat_types::capability::CapabilitySpec;
use domchat_types::error::CapabilityError;

use crate::partition::ScopedStore;

/// A callable action exposed to the generation backend.
///
/// Implementations receive the raw JSON arguments the model produced and a
/// handle already scoped to the session's partition. The handle is opened
/// for this one call and released by the caller afterwards.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Wrap in
/// [`CapabilityDescriptor`](super::CapabilityDescriptor) for dynamic dispatch.
pub trait Capability: Send + Sync {
    /// Name, purpose and parameter schema shown to the model.
    fn spec(&self) -> &CapabilitySpec;

    fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> impl std::future::Future<Output = Result<Value, CapabilityError>> + Send;
}

/// Decode model-supplied arguments into a typed struct.
pub fn decode_arguments<T: DeserializeOwned>(name: &str, arguments: Value) -> Result<T, CapabilityError> {
    // Some models send `null` instead of `{}` for zero-argument calls.
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| CapabilityError::InvalidArguments {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Args {
        query: String,
        #[serde(default = "default_limit")]
        limit: u32,
    }

    fn default_limit() -> u32 {
        5
    }

    #[test]
    fn test_decode_arguments() {
        let args: Args = decode_arguments("search", json!({ "query": "refund" })).unwrap();
        assert_eq!(args.query, "refund");
        assert_eq!(args.limit, 5);
    }

    #[test]
    fn test_decode_arguments_error_names_capability() {
        let err = decode_arguments::<Args>("search", json!({ "limit": 1 })).unwrap_err();
        match err {
            CapabilityError::InvalidArguments { name, reason } => {
                assert_eq!(name, "search");
                assert!(reason.contains("query"));
            }
            other => panic!("expected InvalidArguments, got {other:?}"),
        }
    }
}
