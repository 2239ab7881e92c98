//! Taxonomic resolution with a primary and a fallback authority.
//!
//! For one species key the resolver walks the authority chain (ITIS, then
//! WoRMS). Each step paces the source if it has a spacing, reads the memoized
//! response from the cache or fetches and memoizes it, and stops at the first
//! valid/accepted entry. Every scientific name surfaced on the way is fanned
//! out as lookups for the auxiliary sources.
//!
//! A key no authority accepts yields an unresolved summary with class
//! `"none"`. Fetch failures propagate to the caller.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::authorities::{
    AuthorityMatch, AuxiliarySources, ItisAuthority, TaxonomicAuthority, WormsAuthority,
};
use crate::cache::{lookup_key, CacheError, CacheStore};
use crate::domain::{
    AuxiliaryBatch, LookupMessage, SourceDescriptor, SpeciesKey, SpeciesKeyKind, TaxonomicSummary,
    UNRESOLVED_CLASS,
};
use crate::fetcher::{FetchError, Fetcher};
use crate::http_client::HttpRequest;
use crate::SourceId;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// What to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub key: SpeciesKey,
    /// Cleaned, display-case name used for name searches.
    pub scientific_name: String,
    /// Fallback when the authority reports no common name.
    pub common_name: Option<String>,
    pub descriptor: SourceDescriptor,
}

/// Resolver output: the summary plus follow-up auxiliary lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub summary: TaxonomicSummary,
    /// One batch per auxiliary source; empty when no names were surfaced.
    pub auxiliary: Vec<AuxiliaryBatch>,
}

/// Outcome of a memoized lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Cached(Value),
    Fetched(Value),
    /// The source answered successfully but had nothing for the name.
    Empty,
    /// The source cannot be queried for this key.
    Skipped,
}

impl LookupOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Cached(value) | Self::Fetched(value) => Some(value),
            Self::Empty | Self::Skipped => None,
        }
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Resolves species keys against the authority chain.
#[derive(Clone)]
pub struct TaxonomicResolver {
    cache: Arc<dyn CacheStore>,
    fetcher: Fetcher,
    authorities: Vec<Arc<dyn TaxonomicAuthority>>,
    auxiliary: AuxiliarySources,
    in_flight: Arc<Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>>,
}

impl TaxonomicResolver {
    /// Resolver over ITIS then WoRMS.
    pub fn new(cache: Arc<dyn CacheStore>, fetcher: Fetcher, auxiliary: AuxiliarySources) -> Self {
        Self::with_authorities(
            cache,
            fetcher,
            auxiliary,
            vec![
                Arc::new(ItisAuthority::default()),
                Arc::new(WormsAuthority::default()),
            ],
        )
    }

    pub fn with_authorities(
        cache: Arc<dyn CacheStore>,
        fetcher: Fetcher,
        auxiliary: AuxiliarySources,
        authorities: Vec<Arc<dyn TaxonomicAuthority>>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            authorities,
            auxiliary,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Resolve one species key.
    ///
    /// Resolutions of the same key within this process run one at a time, so
    /// a second caller finds the first caller's memoized responses.
    pub async fn resolve(&self, request: &ResolutionRequest) -> Result<Resolution, ResolveError> {
        let _guard = self.lock_key(request.key.as_str()).await;

        let mut source_chain = Vec::with_capacity(self.authorities.len());
        let mut surfaced_names = BTreeSet::new();
        let mut accepted: Option<(SourceId, AuthorityMatch)> = None;

        for authority in &self.authorities {
            let source = authority.source();
            source_chain.push(source);
            self.fetcher.pace(source).await;

            let http_request = authority.request(&request.key, &request.scientific_name);
            let outcome = self
                .memoized(source, &request.key, http_request, |body| authority.has_data(body))
                .await?;
            let Some(body) = outcome.value() else {
                debug!(sppin_key = %request.key, source = %source, "authority returned no data");
                continue;
            };

            let findings = authority.interpret(body);
            surfaced_names.extend(
                findings
                    .alternate_names
                    .into_iter()
                    .map(|name| name.trim().to_owned())
                    .filter(|name| !name.is_empty()),
            );

            if let Some(found) = findings.accepted {
                accepted = Some((source, found));
                break;
            }
            debug!(sppin_key = %request.key, source = %source, "no valid or accepted entry, falling back");
        }

        let summary = match accepted {
            Some((source, found)) => summarize(source, found, source_chain, request),
            None => {
                info!(
                    sppin_key = %request.key,
                    scientific_name = %request.scientific_name,
                    "taxonomy unresolved by every authority"
                );
                TaxonomicSummary::unresolved(source_chain, request.common_name.clone())
            }
        };

        Ok(Resolution {
            summary,
            auxiliary: fan_out(&surfaced_names, &request.descriptor),
        })
    }

    /// Look up `message` at an auxiliary source, memoizing a response that
    /// carries data. Only name keys can be looked up, one at a time per
    /// source and key.
    pub async fn lookup_auxiliary(
        &self,
        source: SourceId,
        message: &LookupMessage,
    ) -> Result<LookupOutcome, ResolveError> {
        let SpeciesKeyKind::Name(name) = message.sppin_key.kind() else {
            return Ok(LookupOutcome::Skipped);
        };
        let Some(http_request) = self.auxiliary.request(source, name) else {
            warn!(source = %source, sppin_key = %message.sppin_key, "auxiliary source not queryable, skipping");
            return Ok(LookupOutcome::Skipped);
        };

        let _guard = self.lock_key(&lookup_key(source, &message.sppin_key)).await;
        self.fetcher.pace(source).await;
        self.memoized(source, &message.sppin_key, http_request, |body| {
            AuxiliarySources::has_data(source, body)
        })
        .await
    }

    /// Cache-or-fetch under `<source>:<key>`. Only successful, non-empty JSON
    /// responses that pass `worth_caching` are written.
    async fn memoized(
        &self,
        source: SourceId,
        key: &SpeciesKey,
        request: HttpRequest,
        worth_caching: impl Fn(&Value) -> bool,
    ) -> Result<LookupOutcome, ResolveError> {
        let cache_key = lookup_key(source, key);
        if let Some(entry) = self.cache.get(&cache_key).await? {
            debug!(cache_key = %cache_key, "lookup cache hit");
            return Ok(LookupOutcome::Cached(entry.value));
        }

        let response = self.fetcher.fetch(source, request).await?;
        if response.is_empty() {
            return Ok(LookupOutcome::Empty);
        }

        let body: Value = match serde_json::from_str(&response.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(source = %source, sppin_key = %key, error = %err, "response is not JSON");
                return Ok(LookupOutcome::Empty);
            }
        };
        if !worth_caching(&body) {
            return Ok(LookupOutcome::Empty);
        }

        let committed = self.cache.put(&cache_key, body).await?;
        Ok(LookupOutcome::Fetched(committed.value().clone()))
    }

    /// Serialize work on `key` within this process.
    async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock: KeyLock = {
            let mut in_flight = self
                .in_flight
                .lock()
                .expect("resolver in-flight map poisoned");
            let existing = in_flight.get(key).and_then(Weak::upgrade);
            match existing {
                Some(lock) => lock,
                None => {
                    in_flight.retain(|_, lock| lock.strong_count() > 0);
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    in_flight.insert(key.to_owned(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }
}

fn summarize(
    source: SourceId,
    found: AuthorityMatch,
    source_chain: Vec<SourceId>,
    request: &ResolutionRequest,
) -> TaxonomicSummary {
    let class_name = found
        .class_name()
        .unwrap_or(UNRESOLVED_CLASS)
        .to_owned();
    let commonname = found
        .commonname
        .clone()
        .or_else(|| request.common_name.clone());

    TaxonomicSummary {
        authority: Some(source),
        authority_id: Some(found.authority_id),
        taxonomic_authority_url: Some(found.taxonomic_authority_url),
        scientificname: Some(found.scientificname).filter(|name| !name.is_empty()),
        commonname,
        rank: found.rank,
        taxonomy: found.taxonomy,
        class_name,
        source_chain,
    }
}

fn fan_out(names: &BTreeSet<String>, descriptor: &SourceDescriptor) -> Vec<AuxiliaryBatch> {
    let lookups = names
        .iter()
        .filter_map(|name| SpeciesKey::from_name(name).ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|sppin_key| LookupMessage {
            source_descriptor: descriptor.clone(),
            sppin_key,
        })
        .collect::<Vec<_>>();

    if lookups.is_empty() {
        return Vec::new();
    }

    SourceId::AUXILIARY
        .into_iter()
        .map(|source| AuxiliaryBatch {
            source,
            lookups: lookups.clone(),
        })
        .collect()
}
