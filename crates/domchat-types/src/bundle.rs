//! Configuration bundle types.
//!
//! A `ConfigBundle` is the fully resolved, validated view of one domain's
//! layered configuration documents. It is immutable once built; the resolver
//! hands out `Arc<ConfigBundle>` and only replaces it on explicit reload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{LlmSettings, RuntimeSettings};

/// Name of the shared partition that every search scope falls back to.
pub const SHARED_PARTITION: &str = "main";

/// Display metadata for a bundle, shown in bundle listings and the UI header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDisplay {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// Agent persona settings for a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub name: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A named, optionally versioned block of instruction text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionTemplate {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub text: String,
}

/// Colour theme for the chat UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiTheme {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
}

impl Default for UiTheme {
    fn default() -> Self {
        Self {
            primary: "#4A90E2".to_string(),
            secondary: "#50C878".to_string(),
            accent: "#FF6B6B".to_string(),
        }
    }
}

/// A one-click prompt button shown by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickAction {
    pub label: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// UI metadata carried by a bundle. Opaque to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiMetadata {
    #[serde(default)]
    pub theme: UiTheme,
    #[serde(default)]
    pub quick_actions: Vec<QuickAction>,
    #[serde(default)]
    pub sample_queries: Vec<String>,
}

/// The fully resolved configuration for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub id: String,
    pub display: BundleDisplay,
    pub agent: AgentSettings,
    /// Baseline instructions shared by every domain (from the agents document).
    pub base_instructions: String,
    /// Ordered instruction-template keys; order is preserved into the prompt.
    pub template_keys: Vec<String>,
    /// Every template defined by the domain's prompt document, keyed by name.
    pub templates: BTreeMap<String, InstructionTemplate>,
    /// Declared capability names in declaration order. Unique.
    pub capabilities: Vec<String>,
    /// Storage partition this bundle's data lives in.
    pub partition: String,
    pub ui: UiMetadata,
    pub llm: LlmSettings,
    pub runtime: RuntimeSettings,
}

impl ConfigBundle {
    /// Look up a template by key.
    pub fn template(&self, key: &str) -> Option<&InstructionTemplate> {
        self.templates.get(key)
    }
}

/// Derive the default partition name for a bundle id (`horse-racing` -> `horse_racing`).
pub fn default_partition_for(bundle_id: &str) -> String {
    bundle_id
        .chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}
