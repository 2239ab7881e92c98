use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{SpeciesKey, UtcDateTime};
use crate::ValidationError;

/// A processable source file as reported by the item index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceItem {
    pub source_item_id: String,
    pub state: String,
    pub year: String,
    pub source_file_url: String,
    pub source_file_date: String,
}

/// One harmonized row of a source file.
///
/// Serialized field names follow the harmonized column names, so a record
/// round-trips through the stage boundary and the cache unchanged. Columns
/// the harmonizer does not know about are carried in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "scientific name")]
    pub scientific_name: String,
    #[serde(rename = "common name", default)]
    pub common_name: Option<String>,
    #[serde(rename = "taxonomic category", default)]
    pub taxonomic_category: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub source_item_id: String,
    #[serde(default)]
    pub source_file_url: String,
    #[serde(default)]
    pub source_file_date: String,
    #[serde(default)]
    pub record_processed: Option<UtcDateTime>,
    #[serde(default)]
    pub clean_scientific_name: String,
    #[serde(default)]
    pub historic_list: bool,
    #[serde(default)]
    pub itis_identifier: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RawRecord {
    pub fn new(scientific_name: impl Into<String>) -> Self {
        let scientific_name = scientific_name.into();
        let clean_scientific_name = clean_scientific_name(&scientific_name);
        Self {
            scientific_name,
            common_name: None,
            taxonomic_category: None,
            state: String::new(),
            year: String::new(),
            source_item_id: String::new(),
            source_file_url: String::new(),
            source_file_date: String::new(),
            record_processed: None,
            clean_scientific_name,
            historic_list: false,
            itis_identifier: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = Some(common_name.into());
        self
    }

    pub fn with_taxonomic_category(mut self, category: impl Into<String>) -> Self {
        self.taxonomic_category = Some(category.into());
        self
    }

    pub fn with_itis_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.itis_identifier = Some(identifier.into());
        self
    }

    /// Stamp the record with the identity of the source file it came from.
    pub fn with_source_item(mut self, item: &SourceItem) -> Self {
        self.source_item_id = item.source_item_id.clone();
        self.source_file_url = item.source_file_url.clone();
        self.source_file_date = item.source_file_date.clone();
        if self.state.is_empty() {
            self.state = item.state.clone();
        }
        if self.year.is_empty() {
            self.year = item.year.clone();
        }
        self
    }

    pub fn species_key(&self) -> Result<SpeciesKey, ValidationError> {
        SpeciesKey::for_record(self)
    }

    /// The name used for authority lookups: the cleaned name, or the raw
    /// name when cleaning left nothing.
    pub fn lookup_name(&self) -> &str {
        if self.clean_scientific_name.is_empty() {
            self.scientific_name.trim()
        } else {
            &self.clean_scientific_name
        }
    }
}

/// A record that survived deduplication, identified by its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    pub row_id: String,
    pub sppin_key: SpeciesKey,
    pub record: RawRecord,
}

const TRUNCATING_TOKENS: [&str; 6] = ["sp.", "spp.", "sp", "spp", "pop.", "population"];

/// Normalize a reported scientific name for lookup.
///
/// Parenthesised text is removed, and everything from a genus placeholder
/// (`sp.`, `spp.`) or a population qualifier (`pop.`, `population`) onward
/// is dropped. Whitespace is collapsed.
pub fn clean_scientific_name(raw: &str) -> String {
    let mut without_parens = String::with_capacity(raw.len());
    let mut depth = 0_usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => without_parens.push(ch),
            _ => {}
        }
    }

    let mut tokens = Vec::new();
    for token in without_parens.split_whitespace() {
        if TRUNCATING_TOKENS.contains(&token.to_ascii_lowercase().as_str()) {
            break;
        }
        tokens.push(token);
    }

    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_drops_parentheses_and_collapses_whitespace() {
        assert_eq!(
            clean_scientific_name("  Ambystoma   (Linguaelapsus)  annulatum "),
            "Ambystoma annulatum"
        );
    }

    #[test]
    fn cleaning_truncates_at_placeholders_and_population_qualifiers() {
        assert_eq!(clean_scientific_name("Cambarus sp. 3"), "Cambarus");
        assert_eq!(clean_scientific_name("Unionidae spp."), "Unionidae");
        assert_eq!(
            clean_scientific_name("Rana pipiens pop. 1"),
            "Rana pipiens"
        );
        assert_eq!(
            clean_scientific_name("Ursus arctos Population 2"),
            "Ursus arctos"
        );
    }

    #[test]
    fn cleaning_keeps_infraspecific_ranks() {
        assert_eq!(
            clean_scientific_name("Sciurus niger var. cinereus"),
            "Sciurus niger var. cinereus"
        );
    }

    #[test]
    fn source_item_fills_missing_state_and_year_only() {
        let item = SourceItem {
            source_item_id: String::from("item-1"),
            state: String::from("Alabama"),
            year: String::from("2015"),
            source_file_url: String::from("https://files.test/al.txt"),
            source_file_date: String::from("2017-09-25T16:52:21Z"),
        };

        let mut record = RawRecord::new("Ambystoma foo");
        record.year = String::from("2005");
        let record = record.with_source_item(&item);

        assert_eq!(record.state, "Alabama");
        assert_eq!(record.year, "2005");
        assert_eq!(record.source_item_id, "item-1");
    }

    #[test]
    fn serializes_with_harmonized_column_names_and_extra_columns() {
        let mut record = RawRecord::new("Ambystoma foo").with_common_name("Foo salamander");
        record
            .extra
            .insert(String::from("notes"), Value::String(String::from("x")));

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["scientific name"], "Ambystoma foo");
        assert_eq!(value["common name"], "Foo salamander");
        assert_eq!(value["notes"], "x");

        let back: RawRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, record);
    }
}
