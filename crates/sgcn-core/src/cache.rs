//! Durable keyed cache for final results and memoized lookups.
//!
//! | Key | Written by |
//! |-----|------------|
//! | `final_res:<species key>` | Result sink, the taxonomy of the first record resolved for a key |
//! | `record:<row id>` | Result sink, once per enriched record |
//! | `<source>:<species key>` | Resolver and stage 4, after a non-empty successful fetch |
//! | `processed:<file url>:<file date>` | Item index, after a run completes an item |
//! | `forwarded:<run id>:<item id>` | Stage 1, once per item per run |
//!
//! Every `put` is insert-if-absent. The first committed value for a key is
//! kept and later writers get it back as [`PutOutcome::Existing`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sgcn_warehouse::{CacheInsert, CachedValue, Warehouse, WarehouseError};
use thiserror::Error;

use crate::domain::{SpeciesKey, UtcDateTime};
use crate::SourceId;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] WarehouseError),

    #[error("cache value for '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache worker failed: {0}")]
    Worker(String),
}

/// One committed cache value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub stored_at: String,
}

/// Outcome of [`CacheStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// This call committed the value.
    Stored(CacheEntry),
    /// The key already held a value; it is returned and the new one discarded.
    Existing(CacheEntry),
}

impl PutOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Self::Stored(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn value(&self) -> &Value {
        &self.entry().value
    }

    pub const fn was_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Keyed get/insert-if-absent store shared by every stage.
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>>;

    /// Commit `value` under `key` unless a value is already committed.
    ///
    /// Concurrent callers observe at most one [`PutOutcome::Stored`] per key.
    fn put<'a>(&'a self, key: &'a str, value: Value) -> CacheFuture<'a, PutOutcome>;
}

pub fn final_result_key(key: &SpeciesKey) -> String {
    format!("final_res:{key}")
}

pub fn record_key(row_id: &str) -> String {
    format!("record:{row_id}")
}

pub fn lookup_key(source: SourceId, key: &SpeciesKey) -> String {
    format!("{source}:{key}")
}

pub fn processed_key(source_file_url: &str, source_file_date: &str) -> String {
    format!("processed:{source_file_url}:{source_file_date}")
}

pub fn forwarded_key(run_id: &str, source_item_id: &str) -> String {
    format!("forwarded:{run_id}:{source_item_id}")
}

/// Read `key` and deserialize it as `T`.
pub async fn get_as<T>(store: &dyn CacheStore, key: &str) -> Result<Option<T>, CacheError>
where
    T: DeserializeOwned,
{
    let Some(entry) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(entry.value)
        .map(Some)
        .map_err(|source| CacheError::Corrupt {
            key: key.to_owned(),
            source,
        })
}

/// Serialize `value` and insert it under `key` if absent.
pub async fn put_as<T>(store: &dyn CacheStore, key: &str, value: &T) -> Result<PutOutcome, CacheError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    store.put(key, value).await
}

/// Process-local store for tests and single-run pipelines.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, sorted.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .entries
            .lock()
            .expect("memory cache mutex poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

impl CacheStore for MemoryCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>> {
        let entry = self
            .entries
            .lock()
            .expect("memory cache mutex poisoned")
            .get(key)
            .cloned();
        Box::pin(async move { Ok(entry) })
    }

    fn put<'a>(&'a self, key: &'a str, value: Value) -> CacheFuture<'a, PutOutcome> {
        let outcome = match self
            .entries
            .lock()
            .expect("memory cache mutex poisoned")
            .entry(key.to_owned())
        {
            Entry::Occupied(existing) => PutOutcome::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                let entry = CacheEntry {
                    key: key.to_owned(),
                    value,
                    stored_at: UtcDateTime::now().format_rfc3339(),
                };
                slot.insert(entry.clone());
                PutOutcome::Stored(entry)
            }
        };
        Box::pin(async move { Ok(outcome) })
    }
}

/// Store backed by the DuckDB `cache` table.
#[derive(Clone)]
pub struct DuckDbCacheStore {
    warehouse: Warehouse,
}

impl DuckDbCacheStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

fn decode(cached: CachedValue) -> Result<CacheEntry, CacheError> {
    let value = serde_json::from_str(&cached.value).map_err(|source| CacheError::Corrupt {
        key: cached.key.clone(),
        source,
    })?;
    Ok(CacheEntry {
        key: cached.key,
        value,
        stored_at: cached.stored_at,
    })
}

impl CacheStore for DuckDbCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>> {
        let warehouse = self.warehouse.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let cached = tokio::task::spawn_blocking(move || warehouse.get(&key))
                .await
                .map_err(|err| CacheError::Worker(err.to_string()))??;
            cached.map(decode).transpose()
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: Value) -> CacheFuture<'a, PutOutcome> {
        let warehouse = self.warehouse.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let serialized = serde_json::to_string(&value)?;
            let inserted = tokio::task::spawn_blocking(move || warehouse.insert_if_absent(&key, &serialized))
                .await
                .map_err(|err| CacheError::Worker(err.to_string()))??;

            Ok(match inserted {
                CacheInsert::Inserted(cached) => PutOutcome::Stored(decode(cached)?),
                CacheInsert::Existing(cached) => PutOutcome::Existing(decode(cached)?),
            })
        })
    }
}
