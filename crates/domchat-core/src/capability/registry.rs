//! Capability registry: partition -> capability name -> implementation.
//!
//! Populated once at startup and shared read-only afterwards. A lookup miss
//! is an ordinary `None`, not an error.

use std::collections::HashMap;

use tracing::warn;

use super::descriptor::CapabilityDescriptor;
use super::handler::Capability;

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    partitions: HashMap<String, HashMap<String, CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability for a partition. A second registration under the
    /// same name replaces the first.
    pub fn register<T: Capability + 'static>(&mut self, partition: &str, capability: T) -> &mut Self {
        let descriptor = CapabilityDescriptor::new(capability);
        let name = descriptor.name().to_string();
        let previous = self
            .partitions
            .entry(partition.to_string())
            .or_default()
            .insert(name.clone(), descriptor);
        if previous.is_some() {
            warn!(partition, capability = %name, "Capability registered twice, keeping the latest");
        }
        self
    }

    pub fn lookup(&self, partition: &str, name: &str) -> Option<&CapabilityDescriptor> {
        self.partitions.get(partition)?.get(name)
    }

    /// Registered names for a partition, sorted.
    pub fn names(&self, partition: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .partitions
            .get(partition)
            .map(|caps| caps.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Partitions with at least one registered capability, sorted.
    pub fn partitions(&self) -> Vec<&str> {
        let mut partitions: Vec<&str> = self.partitions.keys().map(String::as_str).collect();
        partitions.sort_unstable();
        partitions
    }
}
