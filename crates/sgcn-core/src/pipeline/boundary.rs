//! Collaborators the stages consume: item index, record loader, record
//! validator and result sink. Each is a trait with one default
//! implementation.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{final_result_key, processed_key, put_as, record_key, CacheError, CacheStore, PutOutcome};
use crate::domain::{EnrichedRecord, RawRecord, SourceItem, UtcDateTime};
use crate::fetcher::FetchError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP {status} while downloading '{url}'")]
    Download { url: String, status: u16 },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("'{path}' is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("source file '{url}' has no '{column}' column")]
    MissingColumn { url: String, column: &'static str },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Lists source items that still need processing.
pub trait ItemIndex: Send + Sync {
    /// Items carrying a process file and not yet recorded as processed.
    fn processable_items<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SourceItem>, LoadError>>;

    /// Record that every record of `item` was forwarded.
    fn mark_processed<'a>(&'a self, item: &'a SourceItem) -> BoxFuture<'a, Result<(), LoadError>>;
}

/// Loads and harmonizes the records of one source item.
pub trait RecordLoader: Send + Sync {
    fn load<'a>(&'a self, item: &'a SourceItem) -> BoxFuture<'a, Result<Vec<RawRecord>, LoadError>>;
}

/// Result of validating one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub record: RawRecord,
}

/// Structural validation of a harmonized record.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, record: RawRecord) -> Validation;
}

/// Destination for enriched records.
pub trait ResultSink: Send + Sync {
    /// Commit one record. Every record with a distinct `row_id` is kept;
    /// the outcome is `Existing` only when that row was committed before.
    fn store_final<'a>(&'a self, record: &'a EnrichedRecord) -> BoxFuture<'a, Result<PutOutcome, CacheError>>;
}

/// Item index over a repository listing, filtered by `processed:` cache keys.
#[derive(Clone)]
pub struct JsonItemIndex {
    items: Vec<SourceItem>,
    cache: Arc<dyn CacheStore>,
}

impl JsonItemIndex {
    pub fn from_items(items: Vec<SourceItem>, cache: Arc<dyn CacheStore>) -> Self {
        Self { items, cache }
    }

    /// Read a listing file: a JSON array of repository items, or an object
    /// with an `items` array.
    pub fn from_path(path: &Path, cache: Arc<dyn CacheStore>) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let items = parse_listing(&text).map_err(|source| LoadError::Json {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_items(items, cache))
    }

    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }
}

impl ItemIndex for JsonItemIndex {
    fn processable_items<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SourceItem>, LoadError>> {
        Box::pin(async move {
            let mut pending = Vec::with_capacity(self.items.len());
            for item in &self.items {
                let key = processed_key(&item.source_file_url, &item.source_file_date);
                if self.cache.get(&key).await?.is_some() {
                    debug!(source_item_id = %item.source_item_id, "source item already processed");
                    continue;
                }
                pending.push(item.clone());
            }
            Ok(pending)
        })
    }

    fn mark_processed<'a>(&'a self, item: &'a SourceItem) -> BoxFuture<'a, Result<(), LoadError>> {
        Box::pin(async move {
            let key = processed_key(&item.source_file_url, &item.source_file_date);
            let marker = json!({
                "source_item_id": item.source_item_id,
                "processed_at": UtcDateTime::now(),
            });
            self.cache.put(&key, marker).await?;
            Ok(())
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Items(Vec<ListedItem>),
    Wrapped { items: Vec<ListedItem> },
}

#[derive(Debug, Deserialize)]
struct ListedItem {
    id: Option<String>,
    link: Option<ListedLink>,
    #[serde(default)]
    tags: Vec<ListedTag>,
    #[serde(default)]
    dates: Vec<ListedDate>,
    #[serde(default)]
    files: Vec<ListedFile>,
}

#[derive(Debug, Deserialize)]
struct ListedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListedTag {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListedDate {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "dateString")]
    date_string: String,
}

#[derive(Debug, Deserialize)]
struct ListedFile {
    title: Option<String>,
    url: String,
    #[serde(rename = "dateUploaded", default)]
    date_uploaded: Option<String>,
}

/// Turn a repository listing into processable source items.
///
/// Only items with a file titled "Process File" qualify. State comes from
/// the `Place` tag and year from the `Collected` date.
pub fn parse_listing(text: &str) -> Result<Vec<SourceItem>, serde_json::Error> {
    let listed = match serde_json::from_str::<Listing>(text)? {
        Listing::Items(items) | Listing::Wrapped { items } => items,
    };

    Ok(listed.into_iter().filter_map(to_source_item).collect())
}

fn to_source_item(item: ListedItem) -> Option<SourceItem> {
    let process_file = item
        .files
        .iter()
        .find(|file| file.title.as_deref() == Some("Process File"))?;
    let source_item_id = item
        .link
        .as_ref()
        .map(|link| link.url.clone())
        .or_else(|| item.id.clone())?;

    let state = item
        .tags
        .iter()
        .find(|tag| tag.kind.as_deref() == Some("Place"))
        .map(|tag| tag.name.clone());
    let year = item
        .dates
        .iter()
        .find(|date| date.kind.as_deref() == Some("Collected"))
        .map(|date| date.date_string.clone());

    let (Some(state), Some(year)) = (state, year) else {
        warn!(source_item_id = %source_item_id, "process file without Place tag or Collected date, skipping");
        return None;
    };

    Some(SourceItem {
        source_item_id,
        state,
        year,
        source_file_url: process_file.url.clone(),
        source_file_date: process_file.date_uploaded.clone().unwrap_or_default(),
    })
}

/// Requires scientific name, state, year and source file URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFieldsValidator;

impl RecordValidator for RequiredFieldsValidator {
    fn validate(&self, record: RawRecord) -> Validation {
        let valid = [
            &record.scientific_name,
            &record.state,
            &record.year,
            &record.source_file_url,
        ]
        .iter()
        .all(|field| !field.trim().is_empty());

        if record
            .scientific_name
            .to_ascii_lowercase()
            .contains("no scientific name")
        {
            warn!(
                scientific_name = %record.scientific_name,
                common_name = record.common_name.as_deref().unwrap_or_default(),
                "potential bad record"
            );
        }

        Validation { valid, record }
    }
}

/// Commits each enriched record under `record:<row id>` and the first
/// taxonomy seen for its species key under `final_res:<species key>`.
#[derive(Clone)]
pub struct CacheResultSink {
    cache: Arc<dyn CacheStore>,
}

impl CacheResultSink {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }
}

impl ResultSink for CacheResultSink {
    fn store_final<'a>(&'a self, record: &'a EnrichedRecord) -> BoxFuture<'a, Result<PutOutcome, CacheError>> {
        Box::pin(async move {
            let enrichment = put_as(self.cache.as_ref(), &final_result_key(&record.sppin_key), &record.taxonomy).await?;
            if enrichment.was_stored() {
                debug!(sppin_key = %record.sppin_key, "enrichment committed for species key");
            }
            put_as(self.cache.as_ref(), &record_key(&record.row_id), record).await
        })
    }
}

/// Class name to SGCN taxonomic group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomicGroups {
    by_class: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct GroupMapping {
    rank: String,
    name: String,
    sgcntaxonomicgroup: String,
}

impl TaxonomicGroups {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            by_class: pairs
                .into_iter()
                .map(|(class, group)| (class.into(), group.into()))
                .collect(),
        }
    }

    /// Parse either `{"Amphibia": "Amphibians"}` or a list of
    /// `{"rank", "name", "sgcntaxonomicgroup"}` mappings, of which only
    /// `Class` ranks are kept.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        if let Some(object) = value.as_object() {
            let pairs = object
                .iter()
                .filter_map(|(class, group)| group.as_str().map(|group| (class.clone(), group.to_owned())));
            return Ok(Self::from_pairs(pairs));
        }

        let mappings = Vec::<GroupMapping>::deserialize(value)?;
        Ok(Self::from_pairs(
            mappings
                .into_iter()
                .filter(|mapping| mapping.rank == "Class")
                .map(|mapping| (mapping.name, mapping.sgcntaxonomicgroup)),
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let json_error = |source| LoadError::Json {
            path: path.display().to_string(),
            source,
        };
        let value: Value = serde_json::from_str(&text).map_err(json_error)?;
        Self::from_json(&value).map_err(json_error)
    }

    pub fn group_for(&self, class_name: &str) -> Option<&str> {
        self.by_class.get(class_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}
