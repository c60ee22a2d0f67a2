//! Filesystem configuration source for domchat.
//!
//! Documents are read from a config directory (`./config` by default):
//!
//! ```text
//! config/
//!   app.config.yaml
//!   agents.config.yaml
//!   domains/<id>/domain.yaml
//!   domains/<id>/prompts.yaml
//! ```
//!
//! Also provides [`ProcessEnv`] for `${NAME}` expansion and
//! [`scaffold_bundle`] for creating a new bundle skeleton.

use std::path::{Component, Path, PathBuf};

use domchat_core::config::{ConfigSource, SourceEntry, VariableSource, is_valid_bundle_id};
use domchat_types::error::ConfigError;

/// Reads configuration documents relative to a root directory.
#[derive(Debug, Clone)]
pub struct FsConfigSource {
    root: PathBuf,
}

impl FsConfigSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a relative document path onto the root, refusing anything that
    /// would escape it.
    fn resolve(&self, relative: &str) -> Result<PathBuf, ConfigError> {
        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ConfigError::Io(format!(
                "path '{}' is outside the config directory",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ConfigSource for FsConfigSource {
    async fn read(&self, path: &str) -> Result<Option<String>, ConfigError> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %full.display(), "config document not found");
                Ok(None)
            }
            Err(err) => Err(ConfigError::Io(format!("{}: {err}", full.display()))),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<SourceEntry>, ConfigError> {
        let full = self.resolve(dir)?;
        let mut reader = match tokio::fs::read_dir(&full).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ConfigError::Io(format!("{}: {err}", full.display()))),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {e}", full.display())))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ConfigError::Io(format!("{}: {e}", entry.path().display())))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            entries.push(SourceEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Variables from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl VariableSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Create `domains/{id}/domain.yaml` and `prompts.yaml` under `root`.
///
/// Refuses to touch an existing bundle directory. Returns the written paths.
pub async fn scaffold_bundle(
    root: &Path,
    id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<Vec<PathBuf>, ConfigError> {
    if !is_valid_bundle_id(id) {
        return Err(ConfigError::malformed(
            id,
            "bundle id may only contain ASCII letters, digits, '-' and '_'",
        ));
    }

    let dir = root.join("domains").join(id);
    if tokio::fs::try_exists(&dir)
        .await
        .map_err(|e| ConfigError::Io(format!("{}: {e}", dir.display())))?
    {
        return Err(ConfigError::Io(format!(
            "bundle directory {} already exists",
            dir.display()
        )));
    }
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ConfigError::Io(format!("{}: {e}", dir.display())))?;

    let domain = serde_json::json!({
        "domain": {
            "id": id,
            "name": name,
            "description": description.unwrap_or(""),
            "version": "0.1.0",
        },
        "agent": {
            "name": format!("{name} Agent"),
            "model": "${llm.model}",
            "prompt_templates": ["domain_instructions"],
        },
        "tools": { "enabled": [] },
        "ui": { "sample_queries": [] },
    });
    let prompts = serde_json::json!({
        "domain_instructions": format!("You are the assistant for ${{domain.name}}. Answer questions about {name}."),
    });

    let mut written = Vec::with_capacity(2);
    for (file, value) in [("domain.yaml", domain), ("prompts.yaml", prompts)] {
        let text = serde_yaml_ng::to_string(&value)
            .map_err(|e| ConfigError::malformed(file, e.to_string()))?;
        let path = dir.join(file);
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        written.push(path);
    }

    tracing::info!(bundle = %id, dir = %dir.display(), "scaffolded bundle");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use domchat_core::config::ConfigResolver;
    use domchat_core::config::resolver::APP_DOCUMENT;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_read_existing_and_missing() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("app.config.yaml"), "app: {}")
            .await
            .unwrap();
        let source = FsConfigSource::new(tmp.path());

        assert_eq!(
            source.read("app.config.yaml").await.unwrap().as_deref(),
            Some("app: {}")
        );
        assert_eq!(source.read("agents.config.yaml").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_sorted_with_kinds() {
        let tmp = TempDir::new().unwrap();
        let domains = tmp.path().join("domains");
        tokio::fs::create_dir_all(domains.join("zeta")).await.unwrap();
        tokio::fs::create_dir_all(domains.join("alpha")).await.unwrap();
        tokio::fs::write(domains.join("legacy.yaml"), "domain: {}")
            .await
            .unwrap();

        let entries = FsConfigSource::new(tmp.path()).list("domains").await.unwrap();
        assert_eq!(
            entries,
            vec![
                SourceEntry { name: "alpha".into(), is_dir: true },
                SourceEntry { name: "legacy.yaml".into(), is_dir: false },
                SourceEntry { name: "zeta".into(), is_dir: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let tmp = TempDir::new().unwrap();
        let entries = FsConfigSource::new(tmp.path()).list("domains").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_parent_traversal_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = FsConfigSource::new(tmp.path())
            .read("../secrets.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_process_env_reads_path() {
        // PATH is set in any test environment.
        assert!(ProcessEnv.get("PATH").is_some());
        assert!(ProcessEnv.get("DOMCHAT_SURELY_UNSET_VARIABLE_42").is_none());
    }

    #[tokio::test]
    async fn test_scaffold_resolves_and_refuses_overwrite() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(APP_DOCUMENT),
            "app:\n  active_domain: trivia\nllm:\n  model: gpt-4o-mini\n",
        )
        .await
        .unwrap();

        let written = scaffold_bundle(tmp.path(), "trivia", "Trivia Night", Some("Quiz help"))
            .await
            .unwrap();
        assert_eq!(written.len(), 2);

        let resolver = ConfigResolver::new(FsConfigSource::new(tmp.path()), HashMap::new());
        let bundle = resolver.resolve("trivia").await.unwrap();
        assert_eq!(bundle.display.name, "Trivia Night");
        assert_eq!(bundle.agent.model, "gpt-4o-mini");
        assert_eq!(bundle.partition, "trivia");
        assert!(bundle.capabilities.is_empty());
        assert_eq!(
            bundle.templates["domain_instructions"].text,
            "You are the assistant for Trivia Night. Answer questions about Trivia Night."
        );

        let err = scaffold_bundle(tmp.path(), "trivia", "Again", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[tokio::test]
    async fn test_scaffold_rejects_bad_id() {
        let tmp = TempDir::new().unwrap();
        let err = scaffold_bundle(tmp.path(), "../escape", "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }
}
