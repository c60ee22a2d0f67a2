//! Placeholder interpolation over a merged configuration tree.
//!
//! Two passes, run in this order:
//!
//! 1. **Environment** -- `${NAME}` (no dot) is replaced with the variable's
//!    value. Unknown variables are left as the literal placeholder so that
//!    downstream diagnostics can point at them.
//! 2. **Cross-reference** -- `${section.key}` is replaced with the value found
//!    at that dotted path in the same tree. A string that consists of exactly
//!    one reference takes the referenced value as-is (numbers stay numbers);
//!    embedded references are stringified.
//!
//! References form a directed graph (site -> every site living under the
//! referenced path). A cycle in that graph, or a chain that does not settle
//! within [`MAX_REFERENCE_PASSES`] passes, is a `ConfigError::Cycle`.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use tracing::debug;

use domchat_types::error::ConfigError;

use super::source::VariableSource;

/// Upper bound on cross-reference resolution passes.
pub const MAX_REFERENCE_PASSES: usize = 8;

type Path = Vec<String>;

/// A `${...}` occurrence inside a string, as byte offsets of the whole token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    start: usize,
    end: usize,
    name: String,
}

impl Placeholder {
    fn is_reference(&self) -> bool {
        self.name.contains('.')
    }

    fn path(&self) -> Path {
        self.name.split('.').map(str::to_string).collect()
    }
}

fn placeholders(text: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find("${") {
        let start = cursor + offset;
        let Some(close) = text[start + 2..].find('}') else {
            break;
        };
        let end = start + 2 + close + 1;
        let name = text[start + 2..end - 1].trim();
        if !name.is_empty() {
            found.push(Placeholder {
                start,
                end,
                name: name.to_string(),
            });
        }
        cursor = end;
    }
    found
}

/// Rebuild `text`, replacing each placeholder for which `replace` returns a value.
fn splice(text: &str, found: &[Placeholder], mut replace: impl FnMut(&Placeholder) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for placeholder in found {
        out.push_str(&text[cursor..placeholder.start]);
        match replace(placeholder) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&text[placeholder.start..placeholder.end]),
        }
        cursor = placeholder.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Expand `${NAME}` environment placeholders in place.
///
/// Returns the names that could not be resolved, in encounter order.
pub fn expand_env(value: &mut Value, vars: &dyn VariableSource) -> Vec<String> {
    let mut unresolved = Vec::new();
    expand_env_inner(value, vars, &mut unresolved);
    for name in &unresolved {
        debug!(variable = %name, "Unresolved configuration variable left unexpanded");
    }
    unresolved
}

fn expand_env_inner(value: &mut Value, vars: &dyn VariableSource, unresolved: &mut Vec<String>) {
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| expand_env_inner(v, vars, unresolved)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| expand_env_inner(v, vars, unresolved)),
        Value::String(text) => {
            let found: Vec<Placeholder> = placeholders(text)
                .into_iter()
                .filter(|p| !p.is_reference())
                .collect();
            if found.is_empty() {
                return;
            }
            *text = splice(text, &found, |p| match vars.get(&p.name) {
                Some(v) => Some(v),
                None => {
                    unresolved.push(p.name.clone());
                    None
                }
            });
        }
        _ => {}
    }
}

fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Every string leaf that still contains at least one cross-reference,
/// paired with the paths it references.
fn reference_sites(root: &Value) -> Vec<(Path, Vec<Path>)> {
    fn walk(value: &Value, path: &mut Path, out: &mut Vec<(Path, Vec<Path>)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    path.push(key.clone());
                    walk(child, path, out);
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    path.push(index.to_string());
                    walk(child, path, out);
                    path.pop();
                }
            }
            Value::String(text) => {
                let refs: Vec<Path> = placeholders(text)
                    .iter()
                    .filter(|p| p.is_reference())
                    .map(Placeholder::path)
                    .collect();
                if !refs.is_empty() {
                    out.push((path.clone(), refs));
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(root, &mut Vec::new(), &mut out);
    out
}

fn contains_reference(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.values().any(contains_reference),
        Value::Array(items) => items.iter().any(contains_reference),
        Value::String(text) => placeholders(text).iter().any(Placeholder::is_reference),
        _ => false,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Reject reference graphs with cycles before attempting any substitution.
fn check_acyclic(sites: &[(Path, Vec<Path>)]) -> Result<(), ConfigError> {
    let mut graph = DiGraph::<String, ()>::new();
    let nodes: Vec<NodeIndex> = sites
        .iter()
        .map(|(path, _)| graph.add_node(path.join(".")))
        .collect();

    for (i, (_, refs)) in sites.iter().enumerate() {
        for target in refs {
            for (j, (other, _)) in sites.iter().enumerate() {
                if other.starts_with(target) {
                    graph.add_edge(nodes[i], nodes[j], ());
                }
            }
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
        ConfigError::Cycle(format!(
            "'{}' participates in a reference cycle",
            graph[cycle.node_id()]
        ))
    })
}

/// Try to substitute the references in one string.
///
/// Returns `Ok(None)` when no reference in `text` is ready yet (its target
/// still contains unresolved references).
fn substitute(root: &Value, text: &str, document: &str) -> Result<Option<Value>, ConfigError> {
    let found: Vec<Placeholder> = placeholders(text)
        .into_iter()
        .filter(Placeholder::is_reference)
        .collect();

    let mut targets = Vec::with_capacity(found.len());
    for placeholder in &found {
        let target = lookup(root, &placeholder.path()).ok_or_else(|| {
            ConfigError::malformed(
                document,
                format!("reference '${{{}}}' points at a missing key", placeholder.name),
            )
        })?;
        targets.push((!contains_reference(target)).then_some(target));
    }

    if targets.iter().all(Option::is_none) {
        return Ok(None);
    }

    if let [placeholder] = found.as_slice() {
        if placeholder.start == 0 && placeholder.end == text.len() {
            return Ok(targets[0].cloned());
        }
    }

    let mut ready = targets.iter();
    let spliced = splice(text, &found, |_| {
        ready.next().copied().flatten().map(stringify)
    });
    Ok(Some(Value::String(spliced)))
}

/// Resolve `${a.b.c}` cross-references in place.
///
/// `document` labels errors (usually the bundle's primary document path).
pub fn resolve_references(root: &mut Value, document: &str) -> Result<(), ConfigError> {
    let sites = reference_sites(root);
    if sites.is_empty() {
        return Ok(());
    }
    check_acyclic(&sites)?;

    for pass in 0..MAX_REFERENCE_PASSES {
        let sites = reference_sites(root);
        if sites.is_empty() {
            debug!(passes = pass, "Configuration references resolved");
            return Ok(());
        }

        let mut progressed = false;
        for (path, _) in &sites {
            let Some(Value::String(text)) = lookup(root, path) else {
                continue;
            };
            let text = text.clone();
            if let Some(resolved) = substitute(root, &text, document)? {
                if let Some(slot) = lookup_mut(root, path) {
                    *slot = resolved;
                    progressed = true;
                }
            }
        }

        if !progressed {
            break;
        }
    }

    let remaining = reference_sites(root);
    if remaining.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = remaining.iter().map(|(path, _)| path.join(".")).collect();
    Err(ConfigError::Cycle(format!(
        "references at [{}] did not settle within {MAX_REFERENCE_PASSES} passes",
        names.join(", ")
    )))
}
