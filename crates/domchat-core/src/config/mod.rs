//! Configuration resolution for domchat.
//!
//! Layered YAML documents (application, agents, domain, prompts) are merged
//! into one tree, environment placeholders are expanded, intra-document
//! cross-references are resolved to a fixed point, and the result is
//! validated into an immutable [`ConfigBundle`](domchat_types::bundle::ConfigBundle).
//!
//! - `source`: where documents and variables come from (`ConfigSource`, `VariableSource`)
//! - `interpolate`: the two interpolation passes
//! - `resolver`: merge, validation, and the bundle cache

pub mod interpolate;
pub mod resolver;
pub mod source;

pub use resolver::{ConfigResolver, is_valid_bundle_id};
pub use source::{ConfigSource, MemoryConfigSource, SourceEntry, VariableSource};
