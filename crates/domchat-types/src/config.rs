//! Process-level settings carried inside every resolved bundle.
//!
//! These come from the `llm`, `database` and `runtime` sections of the
//! application document. Defaults apply to any missing key.

use serde::{Deserialize, Serialize};

/// Generation backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Storage locations, relative to the working directory unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_partitions_dir")]
    pub partitions_dir: String,
}

fn default_db_path() -> String {
    "data/domchat.db".to_string()
}

fn default_partitions_dir() -> String {
    "data/partitions".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            partitions_dir: default_partitions_dir(),
        }
    }
}

/// Limits applied by the turn runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Ceiling on generate -> capability call -> generate rounds per turn.
    #[serde(default = "default_max_generation_iterations")]
    pub max_generation_iterations: u32,
    /// Number of past messages fed back to the model as transcript.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_max_generation_iterations() -> u32 {
    8
}

fn default_history_limit() -> u32 {
    50
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_generation_iterations: default_max_generation_iterations(),
            history_limit: default_history_limit(),
        }
    }
}

/// The application document after interpolation, independent of any bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// The `app` section: process name and the active bundle id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    pub active_domain: String,
}

fn default_app_name() -> String {
    "domchat".to_string()
}
