use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::fetcher::FetchError;
use crate::pipeline::{LoadError, StageError};
use crate::resolver::ResolveError;

/// Contract violations. Raised immediately and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("scientific name cannot be empty")]
    EmptyScientificName,

    #[error("invalid source '{value}', expected one of itis, worms, gbif, ecos, iucn, natureserve")]
    InvalidSource { value: String },

    #[error("species key must start with 'TSN:' or 'Name:': '{value}'")]
    InvalidSpeciesKey { value: String },

    #[error("message is missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("stage {stage} does not accept a {payload} payload")]
    PayloadStageMismatch { stage: u8, payload: &'static str },

    #[error("unknown stage {stage}, expected 1 through 4")]
    UnknownStage { stage: u8 },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
