//! Partition access traits.
//!
//! `PartitionAccess` is the factory stored in a session; `ScopedStore` is the
//! per-invocation handle it opens. Handles own their connection and release
//! it when dropped, so every exit path (success, error, cancellation) gives
//! the connection back.
//!
//! Both traits are object-safe (boxed futures) because sessions hold the
//! factory as `Arc<dyn PartitionAccess>` and capabilities receive the handle
//! as `&mut dyn ScopedStore`.

use futures_util::future::BoxFuture;
use serde_json::Value;

use domchat_types::error::PartitionError;

use super::scope::SearchScope;

/// One result row, column name -> JSON value.
pub type Row = serde_json::Map<String, Value>;

/// A storage handle bound to exactly one partition for its lifetime.
///
/// SQL passed in must name tables with `{table}` markers; see
/// [`SearchScope::render`].
pub trait ScopedStore: Send {
    fn scope(&self) -> &SearchScope;

    fn partition(&self) -> &str {
        self.scope().partition()
    }

    /// Run a query and collect every row.
    fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, PartitionError>>;

    /// Run a statement, returning the number of affected rows.
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<u64, PartitionError>>;
}

/// Opens scoped handles. Cheap to share; holds no open connection itself.
pub trait PartitionAccess: Send + Sync {
    fn open<'a>(
        &'a self,
        partition: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ScopedStore>, PartitionError>>;
}
