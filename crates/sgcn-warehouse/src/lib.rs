//! # SGCN Warehouse
//!
//! DuckDB persistence for the species-resolution cache.
//!
//! ## Overview
//!
//! The pipeline keeps every durable fact in one keyed table, `cache`:
//!
//! | Key form | Contents |
//! |----------|----------|
//! | `final_res:<species key>` | The taxonomy committed for a species key |
//! | `record:<row id>` | One enriched record per source row |
//! | `<source>:<species key>` | A memoized, successful external lookup response |
//! | `processed:<file url>:<file date>` | Marker for a source item whose records were forwarded |
//! | `forwarded:<run id>:<item id>` | Run-scoped marker for items handed to stage 2 |
//!
//! Writes are insert-if-absent: the first value stored under a key wins and every later
//! insert returns the committed value instead of overwriting it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sgcn_warehouse::{CacheInsert, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!
//!     let first = warehouse.insert_if_absent("final_res:Name:ambystoma foo", r#"{"v":1}"#)?;
//!     let second = warehouse.insert_if_absent("final_res:Name:ambystoma foo", r#"{"v":2}"#)?;
//!
//!     assert!(matches!(first, CacheInsert::Inserted(_)));
//!     assert_eq!(second.entry().value, r#"{"v":1}"#);
//!     Ok(())
//! }
//! ```
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `vw_final_results` | Committed enrichments by species key |
//! | `vw_final_records` | Committed enriched records by row id |
//! | `vw_cache_namespaces` | Entry counts per key namespace |

pub mod duckdb;
pub mod migrations;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::{Connection, OptionalExt, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{ConnectionPool, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A key vanished between insert and read-back.
    #[error("cache entry '{key}' missing after insert")]
    MissingAfterInsert { key: String },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for SGCN data.
    pub sgcn_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::for_home(resolve_sgcn_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at `sgcn_home`, with the database under `cache/`.
    pub fn for_home(sgcn_home: impl Into<PathBuf>) -> Self {
        let sgcn_home = sgcn_home.into();
        let db_path = sgcn_home.join("cache").join("sppin.duckdb");
        Self {
            sgcn_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// One row of the `cache` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedValue {
    pub key: String,
    /// Serialized JSON document.
    pub value: String,
    pub stored_at: String,
}

/// Outcome of [`Warehouse::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheInsert {
    /// The value was committed by this call.
    Inserted(CachedValue),
    /// A value was already committed; it is returned unchanged.
    Existing(CachedValue),
}

impl CacheInsert {
    pub fn entry(&self) -> &CachedValue {
        match self {
            Self::Inserted(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn into_entry(self) -> CachedValue {
        match self {
            Self::Inserted(entry) | Self::Existing(entry) => entry,
        }
    }

    pub const fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Entry count for one key namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub entries: i64,
    pub last_stored_at: Option<String>,
}

/// Durable keyed store backing the pipeline cache.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
    write_lock: Arc<Mutex<()>>,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self {
            config,
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize database schema and views.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    /// Read the committed value for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<CachedValue>, WarehouseError> {
        let connection = self.pool.acquire()?;
        read_entry(&connection, key)
    }

    /// Commit `value` under `key` unless a value is already committed.
    ///
    /// Writers are serialized inside the process, and the primary key on `cache`
    /// makes the insert a compare-and-insert against other processes.
    ///
    /// # Panics
    /// Panics if the write lock is poisoned.
    pub fn insert_if_absent(&self, key: &str, value: &str) -> Result<CacheInsert, WarehouseError> {
        let _guard = self
            .write_lock
            .lock()
            .expect("warehouse write lock poisoned");
        let connection = self.pool.acquire()?;

        if let Some(existing) = read_entry(&connection, key)? {
            return Ok(CacheInsert::Existing(existing));
        }

        let params: [&dyn ToSql; 2] = [&key, &value];
        let changed = connection.execute(
            "INSERT OR IGNORE INTO cache (key, value, stored_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;

        let entry = read_entry(&connection, key)?.ok_or_else(|| WarehouseError::MissingAfterInsert {
            key: key.to_owned(),
        })?;

        if changed == 0 {
            Ok(CacheInsert::Existing(entry))
        } else {
            Ok(CacheInsert::Inserted(entry))
        }
    }

    /// Entry counts per key namespace, largest first.
    pub fn namespace_stats(&self) -> Result<Vec<NamespaceStats>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            "SELECT namespace, entries, CAST(last_stored_at AS VARCHAR) \
             FROM vw_cache_namespaces ORDER BY entries DESC, namespace ASC",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(NamespaceStats {
                namespace: row.get(0)?,
                entries: row.get(1)?,
                last_stored_at: row.get(2)?,
            })
        })?;

        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    /// Number of species keys with a committed enrichment.
    pub fn final_result_count(&self) -> Result<i64, WarehouseError> {
        let connection = self.pool.acquire()?;
        let count = connection.query_row("SELECT COUNT(*) FROM vw_final_results", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Number of committed enriched records.
    pub fn final_record_count(&self) -> Result<i64, WarehouseError> {
        let connection = self.pool.acquire()?;
        let count = connection.query_row("SELECT COUNT(*) FROM vw_final_records", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}

fn read_entry(connection: &Connection, key: &str) -> Result<Option<CachedValue>, WarehouseError> {
    let entry = connection
        .query_row(
            "SELECT key, value, CAST(stored_at AS VARCHAR) FROM cache WHERE key = ?",
            [key],
            |row| {
                Ok(CachedValue {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    stored_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

/// Resolve the SGCN home directory from environment or default.
pub fn resolve_sgcn_home() -> PathBuf {
    if let Some(path) = env::var_os("SGCN_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".sgcn");
    }

    PathBuf::from(".sgcn")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, Warehouse) {
        let temp = tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(WarehouseConfig::for_home(temp.path().join("sgcn-home"))).expect("warehouse open");
        (temp, warehouse)
    }

    #[test]
    fn creates_database_under_home_cache_dir() {
        let (temp, warehouse) = open_temp();
        assert_eq!(
            warehouse.db_path(),
            temp.path().join("sgcn-home").join("cache").join("sppin.duckdb")
        );
        assert!(warehouse.db_path().exists());
    }

    #[test]
    fn get_returns_none_for_unknown_key() {
        let (_temp, warehouse) = open_temp();
        assert_eq!(warehouse.get("itis:Name:nothing").expect("get"), None);
    }

    #[test]
    fn first_insert_wins() {
        let (_temp, warehouse) = open_temp();

        let first = warehouse
            .insert_if_absent("final_res:Name:ambystoma foo", r#"{"v":1}"#)
            .expect("first insert");
        let second = warehouse
            .insert_if_absent("final_res:Name:ambystoma foo", r#"{"v":2}"#)
            .expect("second insert");

        assert!(first.was_inserted());
        assert!(!second.was_inserted());
        assert_eq!(second.entry().value, r#"{"v":1}"#);
        assert_eq!(
            warehouse
                .get("final_res:Name:ambystoma foo")
                .expect("get")
                .map(|entry| entry.value),
            Some(String::from(r#"{"v":1}"#))
        );
    }

    #[test]
    fn concurrent_inserts_commit_exactly_one_value() {
        let (_temp, warehouse) = open_temp();

        let handles = (0..8)
            .map(|index| {
                let warehouse = warehouse.clone();
                std::thread::spawn(move || {
                    warehouse
                        .insert_if_absent("final_res:TSN:173420", &format!(r#"{{"writer":{index}}}"#))
                        .expect("insert")
                })
            })
            .collect::<Vec<_>>();

        let outcomes = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread join"))
            .collect::<Vec<_>>();

        assert_eq!(outcomes.iter().filter(|outcome| outcome.was_inserted()).count(), 1);
        let committed = outcomes[0].entry().value.clone();
        assert!(outcomes.iter().all(|outcome| outcome.entry().value == committed));
    }

    #[test]
    fn namespace_stats_group_by_key_prefix() {
        let (_temp, warehouse) = open_temp();
        warehouse.insert_if_absent("itis:Name:a", "{}").expect("insert");
        warehouse.insert_if_absent("itis:Name:b", "{}").expect("insert");
        warehouse.insert_if_absent("final_res:Name:a", "{}").expect("insert");
        warehouse
            .insert_if_absent("record:r1", r#"{"sppin_key":"Name:a","record":{"state":"Alabama"}}"#)
            .expect("insert");

        let stats = warehouse.namespace_stats().expect("stats");

        assert_eq!(stats[0].namespace, "itis");
        assert_eq!(stats[0].entries, 2);
        assert!(stats.iter().any(|stat| stat.namespace == "final_res" && stat.entries == 1));
        assert!(stats.iter().any(|stat| stat.namespace == "record" && stat.entries == 1));
        assert_eq!(warehouse.final_result_count().expect("count"), 1);
        assert_eq!(warehouse.final_record_count().expect("count"), 1);
    }

    #[test]
    fn reopening_preserves_committed_entries() {
        let temp = tempdir().expect("tempdir");
        let config = WarehouseConfig::for_home(temp.path());
        {
            let warehouse = Warehouse::open(config.clone()).expect("open");
            warehouse.insert_if_absent("worms:Name:x", "[1]").expect("insert");
        }

        let reopened = Warehouse::open(config).expect("reopen");
        assert_eq!(
            reopened.get("worms:Name:x").expect("get").map(|entry| entry.value),
            Some(String::from("[1]"))
        );
    }
}
