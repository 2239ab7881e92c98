//! # Authorities
//!
//! Request builders and response interpreters for the external services.
//!
//! | Source | Role | Endpoint |
//! |--------|------|----------|
//! | [`SourceId::Itis`] | Primary taxonomic authority | ITIS Solr search |
//! | [`SourceId::Worms`] | Secondary taxonomic authority | WoRMS `AphiaRecordsByName` |
//! | [`SourceId::Gbif`] | Auxiliary | GBIF species match |
//! | [`SourceId::Ecos`] | Auxiliary | ECOS species export |
//! | [`SourceId::Iucn`] | Auxiliary | IUCN Red List v3 (token required) |
//! | [`SourceId::Natureserve`] | Auxiliary | NatureServe Explorer species search |
//!
//! Interpreters work on the JSON value stored in the lookup cache, so a
//! memoized response is read exactly like a fresh one.

mod auxiliary;
mod itis;
mod worms;

use serde_json::Value;

use crate::domain::{SpeciesKey, TaxonRank};
use crate::http_client::HttpRequest;
use crate::SourceId;

pub use auxiliary::AuxiliarySources;
pub use itis::ItisAuthority;
pub use worms::WormsAuthority;

/// The accepted entry an authority returned for a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityMatch {
    pub authority_id: String,
    pub taxonomic_authority_url: String,
    pub scientificname: String,
    pub commonname: Option<String>,
    pub rank: Option<String>,
    pub taxonomy: Vec<TaxonRank>,
}

impl AuthorityMatch {
    /// Name of the `Class` rank in the classification, if present.
    pub fn class_name(&self) -> Option<&str> {
        self.taxonomy
            .iter()
            .find(|level| level.rank == "Class")
            .map(|level| level.name.as_str())
    }
}

/// What an authority response says about one name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityFindings {
    /// First entry whose usage/status is valid or accepted.
    pub accepted: Option<AuthorityMatch>,
    /// Every scientific name surfaced by the response, in response order.
    pub alternate_names: Vec<String>,
}

/// A taxonomic authority in the resolution chain.
pub trait TaxonomicAuthority: Send + Sync {
    fn source(&self) -> SourceId;

    /// Request resolving `key`. `scientific_name` is the display-case name
    /// for name keys.
    fn request(&self, key: &SpeciesKey, scientific_name: &str) -> HttpRequest;

    /// Interpret a successful response body.
    fn interpret(&self, body: &Value) -> AuthorityFindings;

    /// Whether `body` carries at least one entry. Bodies without one are
    /// not memoized.
    fn has_data(&self, body: &Value) -> bool;
}
