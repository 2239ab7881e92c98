//! # Stage Chain
//!
//! | Stage | Payload | Produces |
//! |-------|---------|----------|
//! | 1 | `Start` | one `SourceItem` per processable item, once per run |
//! | 2 | `SourceItem` | one `SpeciesRecord` per valid, unique record |
//! | 3 | `SpeciesRecord` | a final `EnrichedRecord`, plus `AuxiliaryBatch`es |
//! | 4 | `AuxiliaryBatch` | nothing; lookups are cached |
//!
//! Stages return [`Dispatch`]es and never deliver them; a driver owns
//! delivery. The collaborators stages depend on sit behind the traits in
//! [`boundary`].

pub mod boundary;
pub mod driver;
pub mod harmonize;
pub mod message;
pub mod report;
pub mod stages;

pub use boundary::{
    BoxFuture, CacheResultSink, ItemIndex, JsonItemIndex, LoadError, RecordLoader, RecordValidator,
    RequiredFieldsValidator, ResultSink, TaxonomicGroups, Validation,
};
pub use driver::{mark_completed_items, ChannelDriver, LocalDriver};
pub use harmonize::{Harmonizer, TsvRecordLoader};
pub use message::{new_run_id, Dispatch, StageMessage, StagePayload};
pub use report::RunReport;
pub use stages::{execute_stage, StageContext, StageError, StageOptions, StageOutcome};
