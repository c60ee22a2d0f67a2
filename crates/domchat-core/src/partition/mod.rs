//! Partition-scoped data access.
//!
//! Every logical partition is a namespace in one shared store. A handle opened
//! for partition `P` searches `[P, main]` for unqualified table names and
//! refuses to reach any other namespace.
//!
//! - `scope`: search scope, catalog, and SQL table-marker rendering (pure)
//! - `access`: the `PartitionAccess` factory and `ScopedStore` handle traits

pub mod access;
pub mod scope;

pub use access::{PartitionAccess, Row, ScopedStore};
pub use scope::{PartitionCatalog, ResolvedTable, SearchScope, validate_identifier};
