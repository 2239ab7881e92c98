//! Tab-delimited source files into harmonized [`RawRecord`]s.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{clean_scientific_name, RawRecord, SourceItem, UtcDateTime};
use crate::http_client::{HttpClient, HttpRequest};
use crate::pipeline::boundary::{BoxFuture, LoadError, RecordLoader};

const DROPPED_COLUMNS: [&str; 1] = ["2005 swap"];
const CATEGORY_ALIASES: [&str; 2] = ["taxonomy group", "taxonomy group (use drop down box)"];

/// Column and field normalization shared by every source file.
#[derive(Debug, Clone, Default)]
pub struct Harmonizer {
    historic_names: HashSet<String>,
    itis_overrides: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ItisOverride {
    #[serde(rename = "ScientificName_original")]
    scientific_name_original: String,
    #[serde(rename = "taxonomicAuthorityID")]
    taxonomic_authority_id: String,
}

impl Harmonizer {
    pub fn new(historic_names: HashSet<String>, itis_overrides: HashMap<String, String>) -> Self {
        Self {
            historic_names,
            itis_overrides,
        }
    }

    /// Load the historic national list (one name per line) and the ITIS
    /// override table (JSON array of `ScientificName_original` /
    /// `taxonomicAuthorityID`). Either file may be absent.
    pub fn from_files(historic_list: Option<&Path>, itis_overrides: Option<&Path>) -> Result<Self, LoadError> {
        let historic_names = match historic_list {
            Some(path) => read_text(path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
            None => HashSet::new(),
        };

        let itis_overrides = match itis_overrides {
            Some(path) => {
                let overrides: Vec<ItisOverride> =
                    serde_json::from_str(&read_text(path)?).map_err(|source| LoadError::Json {
                        path: path.display().to_string(),
                        source,
                    })?;
                overrides
                    .into_iter()
                    .map(|entry| (entry.scientific_name_original, entry.taxonomic_authority_id))
                    .collect()
            }
            None => HashMap::new(),
        };

        Ok(Self::new(historic_names, itis_overrides))
    }

    /// Harmonize the text of one source file.
    ///
    /// Column names are lower-cased, taxonomy-group aliases become
    /// `taxonomic category`, the `2005 swap` column is dropped, and `state` /
    /// `year` come from the item when the file has no such column. Every
    /// record is stamped with `processed`.
    pub fn harmonize(&self, item: &SourceItem, text: &str, processed: UtcDateTime) -> Result<Vec<RawRecord>, LoadError> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let Some(header) = lines.next() else {
            return Ok(Vec::new());
        };

        let columns = header
            .split('\t')
            .map(|column| {
                let column = column.trim().to_lowercase();
                if CATEGORY_ALIASES.contains(&column.as_str()) {
                    String::from("taxonomic category")
                } else {
                    column
                }
            })
            .collect::<Vec<_>>();

        if !columns.iter().any(|column| column == "scientific name") {
            return Err(LoadError::MissingColumn {
                url: item.source_file_url.clone(),
                column: "scientific name",
            });
        }

        let mut records = Vec::new();
        for line in lines {
            let mut cells = BTreeMap::new();
            for (column, cell) in columns.iter().zip(line.split('\t')) {
                if DROPPED_COLUMNS.contains(&column.as_str()) || column.is_empty() {
                    continue;
                }
                cells.insert(column.clone(), cell.trim().to_owned());
            }
            records.push(self.to_record(item, cells, processed));
        }

        info!(
            source_item_id = %item.source_item_id,
            state = %item.state,
            year = %item.year,
            records = records.len(),
            "harmonized source file"
        );
        Ok(records)
    }

    fn to_record(&self, item: &SourceItem, mut cells: BTreeMap<String, String>, processed: UtcDateTime) -> RawRecord {
        let non_empty = |value: Option<String>| value.filter(|value| !value.is_empty());

        let scientific_name = cells.remove("scientific name").unwrap_or_default();
        let common_name = non_empty(cells.remove("common name"));
        let taxonomic_category = non_empty(cells.remove("taxonomic category"));
        let state = cells.remove("state").unwrap_or_else(|| item.state.clone());
        let year = cells.remove("year").unwrap_or_else(|| item.year.clone());

        RawRecord {
            clean_scientific_name: clean_scientific_name(&scientific_name),
            historic_list: self.historic_names.contains(&scientific_name),
            itis_identifier: self.itis_overrides.get(&scientific_name).cloned(),
            scientific_name,
            common_name,
            taxonomic_category,
            state,
            year,
            source_item_id: item.source_item_id.clone(),
            source_file_url: item.source_file_url.clone(),
            source_file_date: item.source_file_date.clone(),
            record_processed: Some(processed),
            extra: cells
                .into_iter()
                .map(|(column, cell)| (column, Value::String(cell)))
                .collect(),
        }
    }
}

/// Decode UTF-8, falling back to Latin-1 for files that are not valid UTF-8.
pub fn decode_source_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug!("source file is not UTF-8, decoding as Latin-1");
            err.into_bytes().into_iter().map(char::from).collect()
        }
    }
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    std::fs::read(path)
        .map(decode_source_text)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads a source file from a local path or over HTTP, then harmonizes it.
#[derive(Clone)]
pub struct TsvRecordLoader {
    http: Arc<dyn HttpClient>,
    harmonizer: Harmonizer,
}

impl TsvRecordLoader {
    pub fn new(http: Arc<dyn HttpClient>, harmonizer: Harmonizer) -> Self {
        Self { http, harmonizer }
    }

    async fn read_source(&self, url: &str) -> Result<String, LoadError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self.http.execute(HttpRequest::get(url)).await.map_err(|err| {
                LoadError::Download {
                    url: format!("{url} ({err})"),
                    status: 0,
                }
            })?;
            if !response.is_success() {
                return Err(LoadError::Download {
                    url: url.to_owned(),
                    status: response.status,
                });
            }
            return Ok(response.body);
        }

        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(decode_source_text(bytes))
    }
}

impl RecordLoader for TsvRecordLoader {
    fn load<'a>(&'a self, item: &'a SourceItem) -> BoxFuture<'a, Result<Vec<RawRecord>, LoadError>> {
        Box::pin(async move {
            let text = self.read_source(&item.source_file_url).await?;
            self.harmonizer.harmonize(item, &text, UtcDateTime::now())
        })
    }
}
