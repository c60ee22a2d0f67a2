//! Resolve a bundle's declared capability names into descriptors.
//!
//! A name with no implementation for the bundle's partition is dropped with
//! a warning; the session simply runs with fewer capabilities.

use std::sync::Arc;

use tracing::{info, warn};

use domchat_types::bundle::ConfigBundle;
use domchat_types::error::CapabilityError;

use super::descriptor::CapabilityDescriptor;
use super::registry::CapabilityRegistry;

/// Result of loading: resolved descriptors in declaration order, plus one
/// warning per dropped name.
#[derive(Debug, Clone, Default)]
pub struct LoadedCapabilities {
    pub capabilities: Vec<CapabilityDescriptor>,
    pub warnings: Vec<String>,
}

impl LoadedCapabilities {
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(CapabilityDescriptor::name).collect()
    }
}

pub struct CapabilityLoader {
    registry: Arc<CapabilityRegistry>,
}

impl CapabilityLoader {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Never fails: unresolved names become warnings.
    pub fn load(&self, bundle: &ConfigBundle) -> LoadedCapabilities {
        let mut loaded = LoadedCapabilities::default();

        for name in &bundle.capabilities {
            match self.registry.lookup(&bundle.partition, name) {
                Some(descriptor) => loaded.capabilities.push(descriptor.clone()),
                None => {
                    let unresolved = CapabilityError::Unresolved {
                        name: name.clone(),
                        partition: bundle.partition.clone(),
                    };
                    warn!(bundle = %bundle.id, error = %unresolved, "Capability dropped");
                    loaded.warnings.push(unresolved.to_string());
                }
            }
        }

        info!(
            bundle = %bundle.id,
            loaded = loaded.capabilities.len(),
            dropped = loaded.warnings.len(),
            "Capabilities loaded"
        );
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EchoCapability, bundle_with};

    #[test]
    fn test_missing_capability_is_dropped_with_warning() {
        let mut registry = CapabilityRegistry::new();
        registry.register("p", EchoCapability::named("a"));
        let loader = CapabilityLoader::new(Arc::new(registry));

        let bundle = bundle_with("p", &["a", "b"], &[]);
        let loaded = loader.load(&bundle);

        assert_eq!(loaded.names(), vec!["a"]);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("'b'"));
    }

    #[test]
    fn test_declaration_order_preserved() {
        let mut registry = CapabilityRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register("p", EchoCapability::named(name));
        }
        let loader = CapabilityLoader::new(Arc::new(registry));

        let loaded = loader.load(&bundle_with("p", &["b", "c", "a"], &[]));
        assert_eq!(loaded.names(), vec!["b", "c", "a"]);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_other_partition_capability_not_resolved() {
        let mut registry = CapabilityRegistry::new();
        registry.register("q", EchoCapability::named("a"));
        let loader = CapabilityLoader::new(Arc::new(registry));

        let loaded = loader.load(&bundle_with("p", &["a"], &[]));
        assert!(loaded.capabilities.is_empty());
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_empty_declaration() {
        let loader = CapabilityLoader::new(Arc::new(CapabilityRegistry::new()));
        let loaded = loader.load(&bundle_with("p", &[], &[]));
        assert!(loaded.capabilities.is_empty());
        assert!(loaded.warnings.is_empty());
    }
}
