use serde::{Deserialize, Serialize};

use crate::domain::{RawRecord, SpeciesKey, UtcDateTime};
use crate::SourceId;

/// Class name reported when no authority yields a `Class` rank.
pub const UNRESOLVED_CLASS: &str = "none";

/// One level of an authority's classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonRank {
    pub rank: String,
    pub name: String,
}

impl TaxonRank {
    pub fn new(rank: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rank: rank.into(),
            name: name.into(),
        }
    }
}

/// Resolver output for one species key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomicSummary {
    /// Authority that produced the accepted entry; `None` when unresolved.
    pub authority: Option<SourceId>,
    pub authority_id: Option<String>,
    pub taxonomic_authority_url: Option<String>,
    pub scientificname: Option<String>,
    pub commonname: Option<String>,
    pub rank: Option<String>,
    pub taxonomy: Vec<TaxonRank>,
    pub class_name: String,
    /// Authorities consulted, in order.
    pub source_chain: Vec<SourceId>,
}

impl TaxonomicSummary {
    pub fn unresolved(source_chain: Vec<SourceId>, commonname: Option<String>) -> Self {
        Self {
            authority: None,
            authority_id: None,
            taxonomic_authority_url: None,
            scientificname: None,
            commonname,
            rank: None,
            taxonomy: Vec::new(),
            class_name: String::from(UNRESOLVED_CLASS),
            source_chain,
        }
    }

    pub const fn is_resolved(&self) -> bool {
        self.authority.is_some()
    }
}

/// Where a lookup request originated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub origin_reference: String,
    pub origin_date: String,
}

impl SourceDescriptor {
    /// Descriptor pointing back at the source file a record was read from.
    pub fn for_record(record: &RawRecord) -> Self {
        Self {
            kind: String::from("SGCN Source File"),
            origin_reference: record.source_file_url.clone(),
            origin_date: record.source_file_date.clone(),
        }
    }

    /// Descriptor for lookups requested outside a pipeline run.
    pub fn ad_hoc() -> Self {
        Self {
            kind: String::from("Ad Hoc Request"),
            origin_reference: String::from("sgcn-cli"),
            origin_date: UtcDateTime::now().format_rfc3339(),
        }
    }
}

/// A pending external-source resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupMessage {
    pub source_descriptor: SourceDescriptor,
    pub sppin_key: SpeciesKey,
}

/// Lookups destined for one auxiliary source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryBatch {
    pub source: SourceId,
    pub lookups: Vec<LookupMessage>,
}

/// Terminal record committed under `record:<row_id>`. Its taxonomy is also
/// the `final_res:<sppin_key>` entry for the first record of a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub row_id: String,
    pub sppin_key: SpeciesKey,
    pub record: RawRecord,
    pub taxonomy: TaxonomicSummary,
}
