//! Configuration document and variable sources.
//!
//! `ConfigSource` abstracts over where YAML documents live (the filesystem in
//! production, memory in tests). `VariableSource` abstracts over the process
//! environment used for `${NAME}` expansion.

use std::collections::HashMap;
use std::sync::RwLock;

use domchat_types::error::ConfigError;

/// One entry returned by [`ConfigSource::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Read-only access to configuration documents addressed by relative path
/// (e.g. `domains/horse-racing/domain.yaml`).
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConfigSource: Send + Sync {
    /// Read a document. `Ok(None)` means the document does not exist.
    fn read(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, ConfigError>> + Send;

    /// List the entries of a directory. A missing directory yields an empty list.
    fn list(
        &self,
        dir: &str,
    ) -> impl std::future::Future<Output = Result<Vec<SourceEntry>, ConfigError>> + Send;
}

/// Lookup of external variables for `${NAME}` placeholders.
pub trait VariableSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

impl VariableSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// In-memory document store, keyed by relative path.
///
/// Used by tests and by tools that assemble bundles without touching disk.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, path: &str, content: &str) -> Self {
        self.insert(path, content);
        self
    }

    /// Insert or replace a document.
    pub fn insert(&self, path: &str, content: &str) {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(path.to_string(), content.to_string());
        }
    }
}

impl ConfigSource for MemoryConfigSource {
    async fn read(&self, path: &str) -> Result<Option<String>, ConfigError> {
        let docs = self
            .documents
            .read()
            .map_err(|_| ConfigError::Io("document store lock poisoned".to_string()))?;
        Ok(docs.get(path).cloned())
    }

    async fn list(&self, dir: &str) -> Result<Vec<SourceEntry>, ConfigError> {
        let docs = self
            .documents
            .read()
            .map_err(|_| ConfigError::Io("document store lock poisoned".to_string()))?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));

        let mut entries: Vec<SourceEntry> = Vec::new();
        for path in docs.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((child, _)) => SourceEntry {
                    name: child.to_string(),
                    is_dir: true,
                },
                None => SourceEntry {
                    name: rest.to_string(),
                    is_dir: false,
                },
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
