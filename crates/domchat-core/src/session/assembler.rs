//! Builds the immutable per-bundle session descriptor.
//!
//! Instruction text is the bundle's base instructions followed by every
//! template named in `template_keys`, in that order, separated by blank
//! lines. A named template that the bundle does not define is fatal:
//! unlike a missing capability, a gap in the instructions changes what the
//! agent is.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use domchat_types::bundle::ConfigBundle;
use domchat_types::capability::CapabilitySpec;
use domchat_types::error::{ConfigError, PartitionError};

use crate::capability::CapabilityDescriptor;
use crate::partition::{PartitionAccess, ScopedStore};

/// Everything a turn needs from the active bundle.
///
/// Holds a partition access *factory*, never an open handle: handles are
/// opened per capability invocation and dropped right after.
#[derive(Clone)]
pub struct SessionDescriptor {
    bundle: Arc<ConfigBundle>,
    instructions: String,
    capabilities: Vec<CapabilityDescriptor>,
    access: Arc<dyn PartitionAccess>,
}

impl SessionDescriptor {
    pub fn bundle(&self) -> &ConfigBundle {
        &self.bundle
    }

    pub fn partition(&self) -> &str {
        &self.bundle.partition
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    /// Specs in declaration order, as sent to the backend.
    pub fn capability_specs(&self) -> Vec<CapabilitySpec> {
        self.capabilities.iter().map(|c| c.spec().clone()).collect()
    }

    /// Open a fresh handle on this session's partition.
    pub async fn open_partition(&self) -> Result<Box<dyn ScopedStore>, PartitionError> {
        self.access.open(&self.bundle.partition).await
    }
}

impl fmt::Debug for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescriptor")
            .field("bundle", &self.bundle.id)
            .field("partition", &self.bundle.partition)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

pub struct SessionAssembler;

impl SessionAssembler {
    pub fn assemble(
        bundle: Arc<ConfigBundle>,
        capabilities: Vec<CapabilityDescriptor>,
        access: Arc<dyn PartitionAccess>,
    ) -> Result<SessionDescriptor, ConfigError> {
        let instructions = Self::build_instructions(&bundle)?;
        info!(
            bundle = %bundle.id,
            templates = bundle.template_keys.len(),
            capabilities = capabilities.len(),
            instruction_chars = instructions.len(),
            "Session assembled"
        );
        Ok(SessionDescriptor {
            bundle,
            instructions,
            capabilities,
            access,
        })
    }

    pub fn build_instructions(bundle: &ConfigBundle) -> Result<String, ConfigError> {
        let mut sections = Vec::with_capacity(bundle.template_keys.len() + 1);
        sections.push(bundle.base_instructions.trim_end().to_string());

        for key in &bundle.template_keys {
            let template = bundle.template(key).ok_or_else(|| {
                ConfigError::malformed(
                    format!("domains/{}/prompts.yaml", bundle.id),
                    format!("instruction template '{key}' is not defined"),
                )
            })?;
            sections.push(template.text.trim_end().to_string());
        }

        Ok(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EchoCapability, MemoryPartitionAccess, bundle_with};

    #[test]
    fn test_instruction_order() {
        let mut bundle = bundle_with(
            "p",
            &[],
            &[("second", "Second block."), ("first", "First block.\n")],
        );
        bundle.template_keys = vec!["first".to_string(), "second".to_string()];

        let text = SessionAssembler::build_instructions(&bundle).unwrap();
        assert_eq!(text, "Base instructions.\n\nFirst block.\n\nSecond block.");
    }

    #[test]
    fn test_missing_template_is_malformed() {
        let mut bundle = bundle_with("p", &[], &[("first", "First")]);
        bundle.template_keys = vec!["first".to_string(), "ghost".to_string()];

        let err = SessionAssembler::build_instructions(&bundle).unwrap_err();
        match err {
            ConfigError::Malformed { reason, .. } => assert!(reason.contains("ghost")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_unlisted_templates_are_ignored() {
        let bundle = bundle_with("p", &[], &[("extra", "Not listed")]);
        let text = SessionAssembler::build_instructions(&bundle).unwrap();
        assert_eq!(text, "Base instructions.");
    }

    #[tokio::test]
    async fn test_descriptor_binds_capabilities_and_factory() {
        let bundle = Arc::new(bundle_with("p", &["a"], &[]));
        let access = Arc::new(MemoryPartitionAccess::new());
        let session = SessionAssembler::assemble(
            bundle,
            vec![CapabilityDescriptor::new(EchoCapability::named("a"))],
            access.clone(),
        )
        .unwrap();

        assert_eq!(session.partition(), "p");
        assert!(session.capability("a").is_some());
        assert!(session.capability("b").is_none());
        assert_eq!(session.capability_specs()[0].name, "a");
        // Assembling opens nothing.
        assert_eq!(access.opened(), 0);

        let handle = session.open_partition().await.unwrap();
        assert_eq!(handle.partition(), "p");
        assert_eq!(access.open_handles(), 1);
        drop(handle);
        assert_eq!(access.open_handles(), 0);
    }
}
