//! Search scopes and table resolution.
//!
//! SQL issued through a scoped handle names tables with markers instead of
//! raw identifiers:
//!
//! - `{races}` -- first namespace in the scope that owns `races`
//! - `{main.accounts}` -- an explicit namespace, which must be in scope
//!
//! Resolution consults a [`PartitionCatalog`] of which namespace owns which
//! table. A marker that would land in a namespace outside the scope is a
//! [`PartitionError::AccessViolation`], never a silent fallback.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use domchat_types::bundle::SHARED_PARTITION;
use domchat_types::error::PartitionError;

/// Check that a namespace or table name is a plain lowercase identifier.
pub fn validate_identifier(name: &str) -> Result<(), PartitionError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(PartitionError::InvalidIdentifier(name.to_string()))
    }
}

/// Ordered namespaces consulted for unqualified table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    namespaces: Vec<String>,
}

impl SearchScope {
    /// Scope `[partition, main]`.
    pub fn for_partition(partition: &str) -> Result<Self, PartitionError> {
        validate_identifier(partition)?;
        let mut namespaces = vec![partition.to_string()];
        if partition != SHARED_PARTITION {
            namespaces.push(SHARED_PARTITION.to_string());
        }
        Ok(Self { namespaces })
    }

    /// The partition this scope was opened for.
    pub fn partition(&self) -> &str {
        &self.namespaces[0]
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|ns| ns == namespace)
    }

    /// Resolve one marker body (`table` or `namespace.table`).
    pub fn resolve_table(
        &self,
        catalog: &PartitionCatalog,
        reference: &str,
    ) -> Result<ResolvedTable, PartitionError> {
        match reference.split_once('.') {
            Some((namespace, table)) => {
                validate_identifier(namespace)?;
                validate_identifier(table)?;
                if !self.contains(namespace) {
                    return Err(self.violation(table, namespace));
                }
                if catalog.owns(namespace, table) {
                    Ok(ResolvedTable::new(namespace, table))
                } else {
                    Err(self.unknown(table))
                }
            }
            None => {
                validate_identifier(reference)?;
                if let Some(namespace) = self
                    .namespaces
                    .iter()
                    .find(|ns| catalog.owns(ns, reference))
                {
                    return Ok(ResolvedTable::new(namespace, reference));
                }
                match catalog.owners(reference).first() {
                    Some(owner) => Err(self.violation(reference, owner)),
                    None => Err(self.unknown(reference)),
                }
            }
        }
    }

    /// Replace every `{marker}` in `sql` with a quoted, resolved table name.
    ///
    /// Braces inside single-quoted string literals are left alone.
    pub fn render(&self, catalog: &PartitionCatalog, sql: &str) -> Result<String, PartitionError> {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut in_literal = false;
        let mut rest = sql;

        while let Some(pos) = rest.find(['\'', '{']) {
            let (before, tail) = rest.split_at(pos);
            out.push_str(before);

            if tail.starts_with('\'') {
                in_literal = !in_literal;
                out.push('\'');
                rest = &tail[1..];
                continue;
            }

            if in_literal {
                out.push('{');
                rest = &tail[1..];
                continue;
            }

            let close = tail
                .find('}')
                .ok_or_else(|| PartitionError::InvalidIdentifier(tail.to_string()))?;
            let reference = tail[1..close].trim();
            let resolved = self.resolve_table(catalog, reference)?;
            out.push_str(&resolved.to_string());
            rest = &tail[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn violation(&self, table: &str, owner: &str) -> PartitionError {
        PartitionError::AccessViolation {
            partition: self.partition().to_string(),
            table: table.to_string(),
            owner: owner.to_string(),
        }
    }

    fn unknown(&self, table: &str) -> PartitionError {
        PartitionError::UnknownTable {
            table: table.to_string(),
            scope: self.namespaces.clone(),
        }
    }
}

/// Which namespace owns which tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionCatalog {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl PartitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_table(mut self, namespace: &str, table: &str) -> Self {
        self.insert(namespace, table);
        self
    }

    pub fn insert(&mut self, namespace: &str, table: &str) {
        self.tables
            .entry(namespace.to_string())
            .or_default()
            .insert(table.to_string());
    }

    pub fn owns(&self, namespace: &str, table: &str) -> bool {
        self.tables
            .get(namespace)
            .is_some_and(|tables| tables.contains(table))
    }

    /// Namespaces that define `table`, in name order.
    pub fn owners(&self, table: &str) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, tables)| tables.contains(table))
            .map(|(ns, _)| ns.as_str())
            .collect()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// A table reference that passed scope checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTable {
    pub namespace: String,
    pub table: String,
}

impl ResolvedTable {
    fn new(namespace: &str, table: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for ResolvedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\".\"{}\"", self.namespace, self.table)
    }
}
