//! The configuration resolver: layered documents in, immutable bundle out.
//!
//! Document layout, relative to the source root:
//!
//! ```text
//! app.config.yaml                 # app.active_domain, llm, database, runtime
//! agents.config.yaml              # agents.default.base_instructions (optional)
//! domains/<id>/domain.yaml        # preferred layout
//! domains/<id>/prompts.yaml       # template key -> text (optional)
//! domains/<id>.yaml               # legacy flat layout
//! ```
//!
//! Layers merge in that order (later layers win on scalar conflicts), the
//! prompt document lands under `prompts`, and the merged tree goes through
//! [`interpolate`](super::interpolate) before validation.
//!
//! Resolved bundles are cached by id for the life of the resolver. Nothing
//! invalidates the cache except [`ConfigResolver::reload`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use domchat_types::bundle::{
    AgentSettings, BundleDisplay, ConfigBundle, InstructionTemplate, SHARED_PARTITION,
    UiMetadata, default_partition_for,
};
use domchat_types::config::{AppSettings, LlmSettings, RuntimeSettings};
use domchat_types::error::ConfigError;

use crate::partition::validate_identifier;

use super::interpolate::{expand_env, resolve_references};
use super::source::{ConfigSource, VariableSource};

pub const APP_DOCUMENT: &str = "app.config.yaml";
pub const AGENTS_DOCUMENT: &str = "agents.config.yaml";
pub const DOMAINS_DIR: &str = "domains";

/// Used when the agents document is absent.
pub const DEFAULT_BASE_INSTRUCTIONS: &str = "You are a helpful AI assistant.";
const DEFAULT_AGENT_NAME: &str = "AssistantAgent";

/// Resolves bundle ids into validated, cached [`ConfigBundle`]s.
///
/// Generic over the document source and the variable source so that tests
/// can run entirely in memory.
pub struct ConfigResolver<S: ConfigSource, V: VariableSource> {
    source: S,
    vars: V,
    bundles: DashMap<String, Arc<ConfigBundle>>,
    app: RwLock<Option<Arc<AppSettings>>>,
    /// Variable values as first seen, shared by every document until reload.
    snapshot: DashMap<String, Option<String>>,
}

/// Reads each variable from the live source at most once per cache
/// generation, so every bundle resolved in between sees the same value.
struct VariableSnapshot<'a, V> {
    live: &'a V,
    taken: &'a DashMap<String, Option<String>>,
}

impl<V: VariableSource> VariableSource for VariableSnapshot<'_, V> {
    fn get(&self, name: &str) -> Option<String> {
        if let Some(seen) = self.taken.get(name) {
            return seen.value().clone();
        }
        let value = self.live.get(name);
        self.taken
            .entry(name.to_string())
            .or_insert(value)
            .value()
            .clone()
    }
}

impl<S: ConfigSource, V: VariableSource> ConfigResolver<S, V> {
    pub fn new(source: S, vars: V) -> Self {
        Self {
            source,
            vars,
            bundles: DashMap::new(),
            app: RwLock::new(None),
            snapshot: DashMap::new(),
        }
    }

    fn variables(&self) -> VariableSnapshot<'_, V> {
        VariableSnapshot {
            live: &self.vars,
            taken: &self.snapshot,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The interpolated application document.
    pub async fn app_settings(&self) -> Result<Arc<AppSettings>, ConfigError> {
        if let Some(cached) = self.app.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let mut value = self
            .read_yaml(APP_DOCUMENT)
            .await?
            .ok_or_else(|| ConfigError::NotFound(APP_DOCUMENT.to_string()))?;
        expand_env(&mut value, &self.variables());
        resolve_references(&mut value, APP_DOCUMENT)?;

        let settings: AppSettings = serde_json::from_value(value)
            .map_err(|e| ConfigError::malformed(APP_DOCUMENT, e.to_string()))?;

        let mut slot = self.app.write().await;
        Ok(Arc::clone(slot.get_or_insert_with(|| Arc::new(settings))))
    }

    /// Id of the bundle named by `app.active_domain`.
    pub async fn active_bundle_id(&self) -> Result<String, ConfigError> {
        Ok(self.app_settings().await?.app.active_domain.clone())
    }

    /// Resolve the bundle named by `app.active_domain`.
    pub async fn resolve_active(&self) -> Result<Arc<ConfigBundle>, ConfigError> {
        let id = self.active_bundle_id().await?;
        self.resolve(&id).await
    }

    /// Resolve a bundle by id, loading it on first access.
    ///
    /// Repeated calls return the same `Arc` without consulting the document or
    /// variable sources again.
    pub async fn resolve(&self, bundle_id: &str) -> Result<Arc<ConfigBundle>, ConfigError> {
        if let Some(cached) = self.bundles.get(bundle_id) {
            return Ok(Arc::clone(cached.value()));
        }

        let bundle = Arc::new(self.load_bundle(bundle_id).await?);
        info!(
            bundle = %bundle.id,
            partition = %bundle.partition,
            capabilities = bundle.capabilities.len(),
            templates = bundle.template_keys.len(),
            "Configuration bundle resolved"
        );

        // A concurrent resolve may have won the race; everyone shares its result.
        let entry = self
            .bundles
            .entry(bundle_id.to_string())
            .or_insert(bundle);
        Ok(Arc::clone(entry.value()))
    }

    /// Drop every cached bundle, the cached application document and the
    /// variable snapshot.
    ///
    /// Bundles already handed out stay valid; only later `resolve` calls
    /// observe the new documents.
    pub async fn reload(&self) {
        let dropped = self.bundles.len();
        self.bundles.clear();
        self.snapshot.clear();
        *self.app.write().await = None;
        info!(dropped, "Configuration cache cleared");
    }

    /// Ids of every bundle present in the source, in either layout.
    pub async fn list_bundles(&self) -> Result<Vec<String>, ConfigError> {
        let mut ids = Vec::new();
        for entry in self.source.list(DOMAINS_DIR).await? {
            if entry.is_dir {
                let path = format!("{DOMAINS_DIR}/{}/domain.yaml", entry.name);
                if self.source.read(&path).await?.is_some() {
                    ids.push(entry.name);
                }
            } else if let Some(stem) = entry.name.strip_suffix(".yaml") {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn read_yaml(&self, path: &str) -> Result<Option<Value>, ConfigError> {
        let Some(text) = self.source.read(path).await? else {
            return Ok(None);
        };
        let value: Value = serde_yaml_ng::from_str(&text)
            .map_err(|e| ConfigError::malformed(path, e.to_string()))?;
        match value {
            Value::Null => Ok(Some(Value::Object(Map::new()))),
            Value::Object(_) => Ok(Some(value)),
            _ => Err(ConfigError::malformed(path, "document root must be a mapping")),
        }
    }

    async fn locate_domain(&self, bundle_id: &str) -> Result<(String, Value), ConfigError> {
        let preferred = format!("{DOMAINS_DIR}/{bundle_id}/domain.yaml");
        if let Some(doc) = self.read_yaml(&preferred).await? {
            return Ok((preferred, doc));
        }

        let legacy = format!("{DOMAINS_DIR}/{bundle_id}.yaml");
        if let Some(doc) = self.read_yaml(&legacy).await? {
            debug!(bundle = %bundle_id, "Using legacy flat domain document");
            return Ok((legacy, doc));
        }

        Err(ConfigError::NotFound(bundle_id.to_string()))
    }

    async fn load_bundle(&self, bundle_id: &str) -> Result<ConfigBundle, ConfigError> {
        if !is_valid_bundle_id(bundle_id) {
            return Err(ConfigError::NotFound(bundle_id.to_string()));
        }

        let app = self
            .read_yaml(APP_DOCUMENT)
            .await?
            .ok_or_else(|| ConfigError::NotFound(APP_DOCUMENT.to_string()))?;

        let agents = match self.read_yaml(AGENTS_DOCUMENT).await? {
            Some(doc) => doc,
            None => {
                warn!(
                    document = AGENTS_DOCUMENT,
                    "Agents document missing, using default base instructions"
                );
                json!({
                    "agents": {
                        "default": {
                            "name": DEFAULT_AGENT_NAME,
                            "base_instructions": DEFAULT_BASE_INSTRUCTIONS,
                        }
                    }
                })
            }
        };

        let (domain_path, domain) = self.locate_domain(bundle_id).await?;

        let prompts_path = format!("{DOMAINS_DIR}/{bundle_id}/prompts.yaml");
        let prompts = self
            .read_yaml(&prompts_path)
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut merged = app;
        deep_merge(&mut merged, agents);
        deep_merge(&mut merged, domain);
        deep_merge(&mut merged, json!({ "prompts": prompts }));

        expand_env(&mut merged, &self.variables());
        resolve_references(&mut merged, &domain_path)?;

        build_bundle(bundle_id, &domain_path, merged)
    }
}

/// Bundle ids double as directory names: ASCII alphanumerics, `-` and `_`.
pub fn is_valid_bundle_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[derive(Deserialize)]
struct RawDocument {
    domain: RawDomain,
    #[serde(default)]
    agent: RawAgent,
    #[serde(default)]
    agents: RawAgents,
    #[serde(default)]
    tools: RawTools,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    ui: UiMetadata,
    #[serde(default)]
    prompts: BTreeMap<String, RawTemplate>,
    #[serde(default)]
    llm: LlmSettings,
    #[serde(default)]
    runtime: RuntimeSettings,
}

#[derive(Deserialize)]
struct RawDomain {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    author: Option<String>,
}

#[derive(Default, Deserialize)]
struct RawAgent {
    name: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    #[serde(default)]
    prompt_templates: Vec<String>,
}

#[derive(Default, Deserialize)]
struct RawAgents {
    #[serde(default)]
    default: RawBaseAgent,
}

#[derive(Default, Deserialize)]
struct RawBaseAgent {
    name: Option<String>,
    base_instructions: Option<String>,
}

#[derive(Default, Deserialize)]
struct RawTools {
    #[serde(default)]
    enabled: Vec<String>,
}

#[derive(Default, Deserialize)]
struct RawStorage {
    partition: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTemplate {
    Text(String),
    Versioned {
        text: String,
        #[serde(default)]
        version: Option<Value>,
    },
}

fn version_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Schema names SQLite reserves; a bundle may not claim them as its partition.
const RESERVED_PARTITIONS: [&str; 2] = [SHARED_PARTITION, "temp"];

/// Apply the same identifier rule the partition layer enforces at `open`,
/// so a bundle that could never be served fails at resolution time.
fn check_partition(document: &str, partition: &str) -> Result<(), ConfigError> {
    if RESERVED_PARTITIONS.contains(&partition) {
        return Err(ConfigError::malformed(
            document,
            format!("storage partition '{partition}' is reserved"),
        ));
    }
    validate_identifier(partition).map_err(|e| {
        ConfigError::malformed(document, format!("invalid storage partition: {e}"))
    })
}

fn build_bundle(
    bundle_id: &str,
    document: &str,
    merged: Value,
) -> Result<ConfigBundle, ConfigError> {
    let raw: RawDocument = serde_json::from_value(merged)
        .map_err(|e| ConfigError::malformed(document, e.to_string()))?;

    if raw.domain.id.trim().is_empty() || raw.domain.name.trim().is_empty() {
        return Err(ConfigError::malformed(
            document,
            "domain.id and domain.name must be non-empty",
        ));
    }
    if raw.domain.id != bundle_id {
        return Err(ConfigError::malformed(
            document,
            format!(
                "domain.id '{}' does not match bundle '{bundle_id}'",
                raw.domain.id
            ),
        ));
    }

    let mut seen = HashSet::new();
    for name in &raw.tools.enabled {
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::malformed(
                document,
                format!("capability '{name}' is declared more than once"),
            ));
        }
    }

    let partition = raw
        .storage
        .partition
        .unwrap_or_else(|| default_partition_for(bundle_id));
    check_partition(document, &partition)?;

    let templates = raw
        .prompts
        .into_iter()
        .map(|(key, template)| {
            let (text, version) = match template {
                RawTemplate::Text(text) => (text, None),
                RawTemplate::Versioned { text, version } => (text, version_string(version)),
            };
            let template = InstructionTemplate {
                key: key.clone(),
                version,
                text,
            };
            (key, template)
        })
        .collect();

    let agent = AgentSettings {
        name: raw
            .agent
            .name
            .or(raw.agents.default.name)
            .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
        model: raw.agent.model.unwrap_or_else(|| raw.llm.model.clone()),
        temperature: raw.agent.temperature.unwrap_or(raw.llm.temperature),
        max_tokens: raw.agent.max_tokens.unwrap_or(raw.llm.max_tokens),
    };

    Ok(ConfigBundle {
        id: raw.domain.id,
        display: BundleDisplay {
            name: raw.domain.name,
            description: raw.domain.description,
            version: version_string(raw.domain.version),
            author: raw.domain.author,
        },
        agent,
        base_instructions: raw
            .agents
            .default
            .base_instructions
            .unwrap_or_else(|| DEFAULT_BASE_INSTRUCTIONS.to_string()),
        template_keys: raw.agent.prompt_templates,
        templates,
        capabilities: raw.tools.enabled,
        partition,
        ui: raw.ui,
        llm: raw.llm,
        runtime: raw.runtime,
    })
}
