//! # Domain Models
//!
//! Record and message types that flow between pipeline stages.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SourceItem`] | One processable per-state, per-year source file |
//! | [`RawRecord`] | One harmonized row of a source file |
//! | [`SpeciesKey`] | `TSN:<id>` or `Name:<cleaned name>` join key |
//! | [`SpeciesRecord`] | A deduplicated record with its content hash and key |
//! | [`TaxonomicSummary`] | Resolver output merged into the final record |
//! | [`LookupMessage`] | A pending auxiliary-source lookup |
//! | [`EnrichedRecord`] | The terminal record handed to the result sink |
//!
//! Records are immutable after stage 2. Stage 3 builds a new
//! [`EnrichedRecord`] instead of patching the incoming one.

mod record;
mod species_key;
mod taxonomy;
mod timestamp;

pub use record::{clean_scientific_name, RawRecord, SourceItem, SpeciesRecord};
pub use species_key::{SpeciesKey, SpeciesKeyKind};
pub use taxonomy::{
    AuxiliaryBatch, EnrichedRecord, LookupMessage, SourceDescriptor, TaxonRank, TaxonomicSummary,
    UNRESOLVED_CLASS,
};
pub use timestamp::UtcDateTime;
