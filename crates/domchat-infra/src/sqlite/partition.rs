//! Partition access over attached SQLite databases.
//!
//! SQLite has no schemas, so each partition lives in its own database file
//! (`{partitions_dir}/{partition}.db`) attached under the partition's name.
//! A handle holds one pooled connection with exactly its own partition
//! attached next to `main`; table markers in SQL are resolved against the
//! catalog of every known partition, so naming another partition's table is
//! caught before the statement reaches SQLite.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use dashmap::DashSet;
use futures_util::future::BoxFuture;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, ConnectOptions, Executor, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use domchat_core::partition::{
    PartitionAccess, PartitionCatalog, Row, ScopedStore, SearchScope, validate_identifier,
};
use domchat_types::bundle::SHARED_PARTITION;
use domchat_types::error::PartitionError;

use super::pool::connect_options;

/// Table definitions applied to a partition database when it is first created.
pub const PARTITION_SCHEMAS: &[(&str, &str)] = &[
    (
        "horse_racing",
        include_str!("../../../../migrations/partitions/horse_racing.sql"),
    ),
    (
        "customer_support",
        include_str!("../../../../migrations/partitions/customer_support.sql"),
    ),
];

const DEFAULT_POOL_SIZE: u32 = 4;

fn storage(e: impl std::fmt::Display) -> PartitionError {
    PartitionError::Storage(e.to_string())
}

fn schema_for(partition: &str) -> Option<&'static str> {
    PARTITION_SCHEMAS
        .iter()
        .find(|(name, _)| *name == partition)
        .map(|(_, sql)| *sql)
}

pub struct SqlitePartitionAccess {
    pool: SqlitePool,
    partitions_dir: PathBuf,
    catalog: RwLock<Arc<PartitionCatalog>>,
    prepared: DashSet<String>,
    prepare_lock: tokio::sync::Mutex<()>,
}

impl SqlitePartitionAccess {
    /// Connect to the shared database and prepare every partition that has
    /// a built-in schema or an existing database file.
    pub async fn new(
        database_url: &str,
        partitions_dir: impl Into<PathBuf>,
    ) -> Result<Self, PartitionError> {
        Self::with_pool_size(database_url, partitions_dir, DEFAULT_POOL_SIZE).await
    }

    pub async fn with_pool_size(
        database_url: &str,
        partitions_dir: impl Into<PathBuf>,
        pool_size: u32,
    ) -> Result<Self, PartitionError> {
        let partitions_dir = partitions_dir.into();
        tokio::fs::create_dir_all(&partitions_dir)
            .await
            .map_err(storage)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(connect_options(database_url).map_err(storage)?)
            .await
            .map_err(storage)?;

        let mut catalog = PartitionCatalog::new();
        {
            let mut conn = pool.acquire().await.map_err(storage)?;
            for table in table_names(&mut conn, SHARED_PARTITION).await? {
                catalog.insert(SHARED_PARTITION, &table);
            }
        }

        let access = Self {
            pool,
            partitions_dir,
            catalog: RwLock::new(Arc::new(catalog)),
            prepared: DashSet::new(),
            prepare_lock: tokio::sync::Mutex::new(()),
        };

        for (partition, _) in PARTITION_SCHEMAS {
            access.prepare(partition).await?;
        }
        for partition in existing_partitions(&access.partitions_dir).await? {
            access.prepare(&partition).await?;
        }

        Ok(access)
    }

    /// Snapshot of every known namespace and the tables it owns.
    pub fn catalog(&self) -> Arc<PartitionCatalog> {
        match self.catalog.read() {
            Ok(catalog) => Arc::clone(&catalog),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn partition_path(&self, partition: &str) -> PathBuf {
        self.partitions_dir.join(format!("{partition}.db"))
    }

    /// Create the partition's database file, apply its schema and record
    /// its tables. Runs once per partition.
    fn prepare<'a>(&'a self, partition: &'a str) -> BoxFuture<'a, Result<(), PartitionError>> {
        Box::pin(async move {
            if self.prepared.contains(partition) {
                return Ok(());
            }
            let _guard = self.prepare_lock.lock().await;
            if self.prepared.contains(partition) {
                return Ok(());
            }

            let path = self.partition_path(partition);
            let mut conn = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true)
                .connect()
                .await
                .map_err(storage)?;

            if let Some(schema) = schema_for(partition) {
                apply_schema(&mut conn, schema).await?;
            }
            let tables = table_names(&mut conn, SHARED_PARTITION).await?;
            if let Err(e) = sqlx::Connection::close(conn).await {
                warn!(partition, error = %e, "Closing partition setup connection failed");
            }

            self.record_tables(partition, &tables)?;
            self.prepared.insert(partition.to_string());

            info!(partition, tables = tables.len(), path = %path.display(), "Partition prepared");
            Ok(())
        })
    }

    fn record_tables(&self, partition: &str, tables: &[String]) -> Result<(), PartitionError> {
        let mut slot = self
            .catalog
            .write()
            .map_err(|_| storage("partition catalog lock poisoned"))?;
        let mut next = PartitionCatalog::clone(&slot);
        for table in tables {
            next.insert(partition, table);
        }
        *slot = Arc::new(next);
        Ok(())
    }
}

impl PartitionAccess for SqlitePartitionAccess {
    fn open<'a>(
        &'a self,
        partition: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ScopedStore>, PartitionError>> {
        Box::pin(async move {
            let scope = SearchScope::for_partition(partition)?;
            if partition != SHARED_PARTITION {
                self.prepare(partition).await?;
            }

            let mut conn = self.pool.acquire().await.map_err(storage)?;
            let attached = detach_others(&mut conn, partition).await?;
            if partition != SHARED_PARTITION && !attached {
                let path = self.partition_path(partition).display().to_string();
                attach(&mut conn, partition, path).await?;
            }

            debug!(partition, "Partition handle opened");
            Ok(Box::new(SqliteScopedStore {
                conn,
                scope,
                catalog: self.catalog(),
            }) as Box<dyn ScopedStore>)
        })
    }
}

/// A pooled connection bound to one partition. Dropping it returns the
/// connection to the pool.
struct SqliteScopedStore {
    conn: PoolConnection<Sqlite>,
    scope: SearchScope,
    catalog: Arc<PartitionCatalog>,
}

impl ScopedStore for SqliteScopedStore {
    fn scope(&self) -> &SearchScope {
        &self.scope
    }

    fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, PartitionError>> {
        Box::pin(async move {
            let rendered = self.scope.render(&self.catalog, sql)?;
            let rows = bind_params(sqlx::query(&rendered), params)
                .fetch_all(&mut *self.conn)
                .await
                .map_err(storage)?;
            rows.iter().map(row_to_json).collect()
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<u64, PartitionError>> {
        Box::pin(async move {
            let rendered = self.scope.render(&self.catalog, sql)?;
            let result = bind_params(sqlx::query(&rendered), params)
                .execute(&mut *self.conn)
                .await
                .map_err(storage)?;
            Ok(result.rows_affected())
        })
    }
}

impl Drop for SqliteScopedStore {
    fn drop(&mut self) {
        debug!(partition = %self.scope.partition(), "Partition handle released");
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Convert a row by the storage class of each value.
fn row_to_json(row: &SqliteRow) -> Result<Row, PartitionError> {
    let mut out = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i).map_err(storage)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(i).map_err(storage)?)
                }
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(i).map_err(storage)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(i).map_err(storage)?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(i).map_err(storage)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

// The connection helpers below return boxed futures so the handle future
// built in `open` stays `Send` across the sqlx executor borrows.

fn apply_schema<'a>(
    conn: &'a mut SqliteConnection,
    schema: &'static str,
) -> BoxFuture<'a, Result<(), PartitionError>> {
    Box::pin(async move {
        conn.execute(sqlx::raw_sql(schema)).await.map_err(storage)?;
        Ok(())
    })
}

/// Tables and views in one attached database.
fn table_names<'a>(
    conn: &'a mut SqliteConnection,
    schema: &'a str,
) -> BoxFuture<'a, Result<Vec<String>, PartitionError>> {
    Box::pin(async move {
        validate_identifier(schema)?;
        let sql = format!(
            "SELECT name FROM \"{schema}\".sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' \
             ORDER BY name"
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .fetch_all(conn)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    })
}

fn attach<'a>(
    conn: &'a mut SqliteConnection,
    partition: &'a str,
    path: String,
) -> BoxFuture<'a, Result<(), PartitionError>> {
    Box::pin(async move {
        validate_identifier(partition)?;
        let sql = format!("ATTACH DATABASE ? AS \"{partition}\"");
        sqlx::query(&sql)
            .bind(path)
            .execute(conn)
            .await
            .map_err(storage)?;
        Ok(())
    })
}

/// Detach every database except `main`, `temp` and `keep`. Returns whether
/// `keep` is still attached.
fn detach_others<'a>(
    conn: &'a mut SqliteConnection,
    keep: &'a str,
) -> BoxFuture<'a, Result<bool, PartitionError>> {
    Box::pin(async move {
        let attached: Vec<(i64, String, String)> = sqlx::query_as("PRAGMA database_list")
            .fetch_all(&mut *conn)
            .await
            .map_err(storage)?;

        let mut kept = false;
        for (_, name, _) in attached {
            if name == "main" || name == "temp" {
                continue;
            }
            if name == keep {
                kept = true;
                continue;
            }
            let sql = format!("DETACH DATABASE \"{name}\"");
            sqlx::query(&sql)
                .execute(&mut *conn)
                .await
                .map_err(storage)?;
            debug!(detached = %name, "Detached stale partition");
        }
        Ok(kept)
    })
}

/// Partition names of `*.db` files already present in `dir`.
async fn existing_partitions(dir: &Path) -> Result<Vec<String>, PartitionError> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(storage)?;
    while let Some(entry) = entries.next_entry().await.map_err(storage)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("db") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if stem != SHARED_PARTITION && validate_identifier(stem).is_ok() {
                found.push(stem.to_string());
            }
        }
    }
    found.sort();
    Ok(found)
}
