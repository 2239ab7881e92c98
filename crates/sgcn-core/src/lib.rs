//! # SGCN Core
//!
//! Staged, cache-coordinated taxonomic resolution for state Species of
//! Greatest Conservation Need lists.
//!
//! ## Overview
//!
//! - **Stage chain** that turns repository items into enriched species
//!   records through four message-driven stages
//! - **Content deduplicator** dropping repeated rows within one source file
//! - **Cache store** with insert-if-absent semantics, in memory or in DuckDB
//! - **Rate-limited fetcher** with bounded exponential-backoff retry
//! - **Taxonomic resolver** over ITIS with WoRMS as fallback, fanning out to
//!   GBIF, ECOS, IUCN and NatureServe
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`authorities`] | Request builders and response interpreters per source |
//! | [`cache`] | Cache-store contract, key layout, memory and DuckDB stores |
//! | [`config`] | `SGCN_*` environment configuration |
//! | [`dedup`] | Canonical JSON and content hashing |
//! | [`domain`] | Records, species keys, taxonomic summaries |
//! | [`error`] | Core error types |
//! | [`fetcher`] | Retry and pacing around the HTTP transport |
//! | [`http_client`] | HTTP transport seam |
//! | [`pipeline`] | Stage messages, stage functions, drivers |
//! | [`resolver`] | Authority chain and auxiliary lookups |
//! | [`retry`] | Backoff policies |
//! | [`source`] | External source identifiers |
//! | [`source_policy`] | Per-source retry, spacing and timeout |
//! | [`throttling`] | Process-wide per-source pacing |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Driver         │────▶│ Result Sink      │
//! │ (local/channel) │     └──────────────────┘
//! └────────┬────────┘
//!          │ StageMessage (JSON)
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Stages 1..4     │────▶│ Deduplicator     │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Resolver        │────▶│ Cache Store      │
//! └────────┬────────┘     └──────────────────┘
//!          │ cache miss
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Fetcher         │────▶│ HTTP Client      │
//! │ (retry + pace)  │     │ (reqwest)        │
//! └─────────────────┘     └──────────────────┘
//! ```

pub mod authorities;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod source_policy;
pub mod throttling;

// Authorities
pub use authorities::{AuthorityFindings, AuthorityMatch, AuxiliarySources, ItisAuthority, TaxonomicAuthority, WormsAuthority};

// Caching
pub use cache::{CacheEntry, CacheError, CacheStore, DuckDbCacheStore, MemoryCacheStore, PutOutcome};

// Configuration
pub use config::{ConfigError, SgcnConfig};

// Deduplication
pub use dedup::{canonical_json, content_hash, Deduplicator, Rejection};

// Domain models
pub use domain::{
    AuxiliaryBatch, EnrichedRecord, LookupMessage, RawRecord, SourceDescriptor, SourceItem, SpeciesKey,
    SpeciesKeyKind, SpeciesRecord, TaxonRank, TaxonomicSummary, UtcDateTime,
};

// Error types
pub use error::{CoreError, ValidationError};

// Fetching
pub use fetcher::{FetchError, Fetcher};

// HTTP client types
pub use http_client::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient, ScriptedHttpClient};

// Pipeline
pub use pipeline::{
    ChannelDriver, Dispatch, LocalDriver, RunReport, StageContext, StageError, StageMessage, StageOptions,
    StagePayload,
};

// Resolution
pub use resolver::{LookupOutcome, Resolution, ResolutionRequest, ResolveError, TaxonomicResolver};

// Retry and pacing
pub use retry::{Backoff, RetryPolicy};
pub use source_policy::{SourcePolicies, SourcePolicy};
pub use throttling::SourceThrottles;

// Source identifiers
pub use source::SourceId;

// Warehouse (re-exported from sgcn-warehouse)
pub use sgcn_warehouse::{NamespaceStats, Warehouse, WarehouseConfig, WarehouseError};
