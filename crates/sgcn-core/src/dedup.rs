//! Content-hash deduplication within one source item.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serialize `value` with every object's keys sorted, at every depth.
pub fn canonical_json<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&sort_keys(value))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Hex SHA-256 of the canonical serialization of `value`.
pub fn content_hash<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Why a record was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Invalid,
    Duplicate,
}

/// Per-batch set of seen content hashes.
///
/// One instance covers one source item; hashes are never compared across
/// items.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a record. Returns its content hash when it should be forwarded.
    ///
    /// A record is forwarded iff it is valid and its hash is unseen. Invalid
    /// records do not claim their hash.
    pub fn admit<T>(&mut self, record: &T, valid: bool) -> Result<Result<String, Rejection>, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        if !valid {
            return Ok(Err(Rejection::Invalid));
        }

        let hash = content_hash(record)?;
        if self.seen.insert(hash.clone()) {
            Ok(Ok(hash))
        } else {
            Ok(Err(Rejection::Duplicate))
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Drop records whose content hash was already seen, keeping first-seen
/// order. Returns each survivor with its hash.
pub fn dedup_records<T>(records: Vec<T>) -> Result<Vec<(String, T)>, serde_json::Error>
where
    T: Serialize,
{
    let mut deduplicator = Deduplicator::new();
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if let Ok(hash) = deduplicator.admit(&record, true)? {
            kept.push((hash, record));
        }
    }
    Ok(kept)
}
