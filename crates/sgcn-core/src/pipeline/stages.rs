//! The four stage functions.
//!
//! Each stage takes a [`StageMessage`] and the shared [`StageContext`] and
//! returns the dispatches it wants delivered. Nothing is carried between
//! stages except the message, so the same functions run inline or behind a
//! queue.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{final_result_key, forwarded_key, get_as, CacheError, CacheStore};
use crate::dedup::{Deduplicator, Rejection};
use crate::domain::{
    AuxiliaryBatch, EnrichedRecord, RawRecord, SourceDescriptor, SourceItem, SpeciesKey, SpeciesRecord,
    TaxonomicSummary, UtcDateTime,
};
use crate::pipeline::boundary::{ItemIndex, LoadError, RecordLoader, RecordValidator, TaxonomicGroups};
use crate::pipeline::message::{Dispatch, StageMessage, StagePayload};
use crate::pipeline::report::RunReport;
use crate::resolver::{LookupOutcome, ResolutionRequest, ResolveError, TaxonomicResolver};
use crate::ValidationError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("stage message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOptions {
    /// Forward auxiliary lookups to stage 4.
    pub auxiliary: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self { auxiliary: true }
    }
}

/// Collaborators shared by every stage invocation.
#[derive(Clone)]
pub struct StageContext {
    pub cache: Arc<dyn CacheStore>,
    pub resolver: TaxonomicResolver,
    pub index: Arc<dyn ItemIndex>,
    pub loader: Arc<dyn RecordLoader>,
    pub validator: Arc<dyn RecordValidator>,
    pub taxonomic_groups: TaxonomicGroups,
    pub options: StageOptions,
}

/// What one stage invocation produced.
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub dispatches: Vec<Dispatch>,
    pub tally: RunReport,
}

impl StageOutcome {
    fn forward(&mut self, message: StageMessage) {
        self.dispatches.push(Dispatch::Forward(message));
    }
}

/// Run the stage named by `message.stage`.
pub async fn execute_stage(ctx: &StageContext, message: &StageMessage) -> Result<StageOutcome, StageError> {
    message.validate()?;

    match &message.payload {
        StagePayload::Start { .. } => enumerate_items(ctx, message).await,
        StagePayload::SourceItem(item) => load_records(ctx, message, item).await,
        StagePayload::SpeciesRecord(species) => resolve_record(ctx, message, species).await,
        StagePayload::AuxiliaryBatch(batch) => lookup_auxiliary(ctx, batch).await,
    }
}

/// Stage 1: forward every processable item once per run.
async fn enumerate_items(ctx: &StageContext, message: &StageMessage) -> Result<StageOutcome, StageError> {
    let items = ctx.index.processable_items().await?;
    let mut outcome = StageOutcome::default();

    for item in items {
        let key = forwarded_key(&message.run_id, &item.source_item_id);
        let marker = json!({
            "source_file_url": item.source_file_url,
            "forwarded_at": UtcDateTime::now(),
        });
        if !ctx.cache.put(&key, marker).await?.was_stored() {
            debug!(
                run_id = %message.run_id,
                source_item_id = %item.source_item_id,
                "source item already forwarded in this run"
            );
            continue;
        }

        info!(
            run_id = %message.run_id,
            source_item_id = %item.source_item_id,
            state = %item.state,
            year = %item.year,
            "forwarding source item"
        );
        outcome.tally.items_forwarded += 1;
        outcome.forward(message.follow_up(StagePayload::SourceItem(item)));
    }

    Ok(outcome)
}

/// Stage 2: load, validate, deduplicate and key the records of one item.
async fn load_records(ctx: &StageContext, message: &StageMessage, item: &SourceItem) -> Result<StageOutcome, StageError> {
    let records = ctx.loader.load(item).await?;
    let mut outcome = StageOutcome::default();
    let mut deduplicator = Deduplicator::new();

    for record in records {
        let validation = ctx.validator.validate(record);
        let record = validation.record;

        let row_id = match deduplicator.admit(&record, validation.valid) {
            Ok(Ok(hash)) => hash,
            Ok(Err(Rejection::Invalid)) => {
                info!(scientific_name = %record.scientific_name, "invalid record skipped");
                outcome.tally.invalid_records += 1;
                continue;
            }
            Ok(Err(Rejection::Duplicate)) => {
                debug!(scientific_name = %record.scientific_name, "duplicate record dropped");
                outcome.tally.duplicates_dropped += 1;
                continue;
            }
            Err(err) => {
                warn!(scientific_name = %record.scientific_name, error = %err, "record could not be hashed, skipping");
                outcome.tally.failures += 1;
                continue;
            }
        };

        let sppin_key = match record.species_key() {
            Ok(key) => key,
            Err(err) => {
                warn!(scientific_name = %record.scientific_name, error = %err, "record has no usable species key, skipping");
                outcome.tally.failures += 1;
                continue;
            }
        };

        outcome.tally.records_forwarded += 1;
        outcome.forward(message.follow_up(StagePayload::SpeciesRecord(SpeciesRecord {
            row_id,
            sppin_key,
            record,
        })));
    }

    info!(
        source_item_id = %item.source_item_id,
        forwarded = outcome.tally.records_forwarded,
        duplicates = outcome.tally.duplicates_dropped,
        invalid = outcome.tally.invalid_records,
        "source item processed"
    );
    outcome.tally.items_completed.push(item.clone());
    Ok(outcome)
}

/// Stage 3: resolve one record and hand the enriched record to the sink.
///
/// Every record reaches the sink. A key with a committed enrichment reuses
/// it and skips the authorities and the auxiliary fan-out.
async fn resolve_record(ctx: &StageContext, message: &StageMessage, species: &SpeciesRecord) -> Result<StageOutcome, StageError> {
    let mut outcome = StageOutcome::default();
    let mut record = species.record.clone();

    let (taxonomy, auxiliary) = match committed_enrichment(ctx, &species.sppin_key).await? {
        Some(taxonomy) => {
            debug!(sppin_key = %species.sppin_key, "reusing committed enrichment");
            outcome.tally.already_resolved += 1;
            (taxonomy, Vec::new())
        }
        None => {
            let request = ResolutionRequest {
                key: species.sppin_key.clone(),
                scientific_name: record.lookup_name().to_owned(),
                common_name: record.common_name.clone(),
                descriptor: SourceDescriptor::for_record(&record),
            };
            let resolution = ctx.resolver.resolve(&request).await?;
            (resolution.summary, resolution.auxiliary)
        }
    };

    if let Some(group) = ctx.taxonomic_groups.group_for(&taxonomy.class_name) {
        record.taxonomic_category = Some(group.to_owned());
    }
    report_missing_fields(species.sppin_key.as_str(), &record, &taxonomy);

    outcome.tally.records_enriched += 1;
    if !taxonomy.is_resolved() {
        outcome.tally.unresolved_records += 1;
    }

    outcome.dispatches.push(Dispatch::Final(EnrichedRecord {
        row_id: species.row_id.clone(),
        sppin_key: species.sppin_key.clone(),
        record,
        taxonomy,
    }));

    if ctx.options.auxiliary {
        for batch in auxiliary {
            outcome.forward(message.follow_up(StagePayload::AuxiliaryBatch(batch)));
        }
    }

    Ok(outcome)
}

/// The taxonomy committed for `key`, if any. An entry that no longer
/// decodes is resolved again.
async fn committed_enrichment(ctx: &StageContext, key: &SpeciesKey) -> Result<Option<TaxonomicSummary>, StageError> {
    match get_as::<TaxonomicSummary>(ctx.cache.as_ref(), &final_result_key(key)).await {
        Ok(taxonomy) => Ok(taxonomy),
        Err(CacheError::Corrupt { key, source }) => {
            warn!(cache_key = %key, error = %source, "committed enrichment is unreadable, resolving again");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn report_missing_fields(sppin_key: &str, record: &RawRecord, taxonomy: &TaxonomicSummary) {
    if !taxonomy.is_resolved() {
        info!(sppin_key, scientific_name = %record.scientific_name, "no authority resolved this name");
    }
    if taxonomy.commonname.is_none() {
        info!(sppin_key, "record has no common name");
    }
    if record.taxonomic_category.is_none() {
        warn!(sppin_key, class_name = %taxonomy.class_name, "record has no taxonomic category");
    }
}

/// Stage 4: auxiliary lookups, run for their caching side effect.
async fn lookup_auxiliary(ctx: &StageContext, batch: &AuxiliaryBatch) -> Result<StageOutcome, StageError> {
    let mut outcome = StageOutcome::default();

    for lookup in &batch.lookups {
        match ctx.resolver.lookup_auxiliary(batch.source, lookup).await {
            Ok(LookupOutcome::Cached(_) | LookupOutcome::Fetched(_)) => outcome.tally.auxiliary_lookups += 1,
            Ok(LookupOutcome::Empty | LookupOutcome::Skipped) => {}
            Err(err) => {
                warn!(
                    source = %batch.source,
                    sppin_key = %lookup.sppin_key,
                    error = %err,
                    "auxiliary lookup failed, skipping"
                );
                outcome.tally.failures += 1;
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::authorities::AuxiliarySources;
    use crate::cache::MemoryCacheStore;
    use crate::domain::SpeciesKey;
    use crate::fetcher::Fetcher;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::pipeline::boundary::{BoxFuture, JsonItemIndex, RequiredFieldsValidator};
    use crate::source_policy::SourcePolicies;

    struct StaticLoader(Vec<RawRecord>);

    impl RecordLoader for StaticLoader {
        fn load<'a>(&'a self, item: &'a SourceItem) -> BoxFuture<'a, Result<Vec<RawRecord>, LoadError>> {
            let records = self
                .0
                .iter()
                .cloned()
                .map(|record| record.with_source_item(item))
                .collect();
            Box::pin(async move { Ok(records) })
        }
    }

    fn item(id: &str) -> SourceItem {
        SourceItem {
            source_item_id: id.to_owned(),
            state: String::from("Alabama"),
            year: String::from("2015"),
            source_file_url: format!("https://repo.test/{id}.txt"),
            source_file_date: String::from("2017-09-25T16:52:21Z"),
        }
    }

    fn context(http: ScriptedHttpClient, items: Vec<SourceItem>, records: Vec<RawRecord>) -> StageContext {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let fetcher = Fetcher::new(
            Arc::new(http),
            SourcePolicies::for_time_unit(Duration::from_millis(1)),
        );
        StageContext {
            resolver: TaxonomicResolver::new(cache.clone(), fetcher, AuxiliarySources::default()),
            index: Arc::new(JsonItemIndex::from_items(items, cache.clone())),
            loader: Arc::new(StaticLoader(records)),
            validator: Arc::new(RequiredFieldsValidator),
            taxonomic_groups: TaxonomicGroups::from_pairs([("Amphibia", "Amphibians")]),
            options: StageOptions::default(),
            cache,
        }
    }

    fn forwarded(outcome: &StageOutcome) -> Vec<&StageMessage> {
        outcome
            .dispatches
            .iter()
            .filter_map(|dispatch| match dispatch {
                Dispatch::Forward(message) => Some(message),
                Dispatch::Final(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn stage_one_forwards_a_repeated_item_once() {
        let ctx = context(ScriptedHttpClient::new(), vec![item("a1"), item("a1"), item("b2")], Vec::new());
        let start = StageMessage::start_with_run_id("run-1", None);

        let first = execute_stage(&ctx, &start).await.expect("stage 1");
        let redelivered = execute_stage(&ctx, &start).await.expect("stage 1 again");

        assert_eq!(forwarded(&first).len(), 2);
        assert!(forwarded(&first).iter().all(|message| message.stage == 2));
        assert!(redelivered.dispatches.is_empty());
    }

    #[tokio::test]
    async fn stage_two_drops_duplicates_and_invalid_records_in_order() {
        let records = vec![
            RawRecord::new("Ambystoma foo"),
            RawRecord::new("Lithobates pipiens"),
            RawRecord::new("Ambystoma foo"),
            RawRecord::new("  "),
        ];
        let ctx = context(ScriptedHttpClient::new(), Vec::new(), records);
        let message = StageMessage::start_with_run_id("run-1", None).follow_up(StagePayload::SourceItem(item("a1")));

        let outcome = execute_stage(&ctx, &message).await.expect("stage 2");

        let keys = forwarded(&outcome)
            .into_iter()
            .map(|message| match &message.payload {
                StagePayload::SpeciesRecord(species) => species.sppin_key.to_string(),
                other => panic!("unexpected payload {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["Name:ambystoma foo", "Name:lithobates pipiens"]);
        assert_eq!(outcome.tally.duplicates_dropped, 1);
        assert_eq!(outcome.tally.invalid_records, 1);
        assert_eq!(outcome.tally.items_completed, vec![item("a1")]);
    }

    #[tokio::test]
    async fn stage_three_assigns_group_and_fans_out() {
        let worms = json!([{
            "AphiaID": 1,
            "url": "https://www.marinespecies.org/aphia.php?p=taxdetails&id=1",
            "scientificname": "Ambystoma foo",
            "status": "accepted",
            "rank": "Species",
            "kingdom": "Animalia",
            "class": "Amphibia"
        }]);
        let http = ScriptedHttpClient::new()
            .route("itis.gov", Ok(HttpResponse::ok_json(r#"{"response":{"docs":[]}}"#)))
            .route("marinespecies.org", Ok(HttpResponse::ok_json(worms.to_string())));
        let ctx = context(http, Vec::new(), Vec::new());
        let record = RawRecord::new("Ambystoma foo").with_source_item(&item("a1"));
        let species = SpeciesRecord {
            row_id: String::from("hash"),
            sppin_key: SpeciesKey::from_name("Ambystoma foo").expect("key"),
            record,
        };
        let message = StageMessage::start_with_run_id("run-1", None)
            .follow_up(StagePayload::SourceItem(item("a1")))
            .follow_up(StagePayload::SpeciesRecord(species));

        let outcome = execute_stage(&ctx, &message).await.expect("stage 3");

        let Some(Dispatch::Final(enriched)) = outcome.dispatches.first() else {
            panic!("expected a final record first");
        };
        assert_eq!(enriched.taxonomy.class_name, "Amphibia");
        assert_eq!(enriched.record.taxonomic_category.as_deref(), Some("Amphibians"));
        assert_eq!(forwarded(&outcome).len(), 4);
        assert!(forwarded(&outcome).iter().all(|message| message.stage == 4));
    }

    #[tokio::test]
    async fn stage_three_reuses_a_committed_enrichment_for_another_state() {
        let http = ScriptedHttpClient::new();
        let ctx = context(http.clone(), Vec::new(), Vec::new());
        let sppin_key = SpeciesKey::from_name("Ambystoma foo").expect("key");
        let mut committed = TaxonomicSummary::unresolved(Vec::new(), None);
        committed.class_name = String::from("Amphibia");
        committed.authority = Some(crate::SourceId::Worms);
        crate::cache::put_as(ctx.cache.as_ref(), &final_result_key(&sppin_key), &committed)
            .await
            .expect("seed");
        let georgia = SourceItem {
            state: String::from("Georgia"),
            ..item("g1")
        };
        let message = StageMessage::start_with_run_id("run-1", None)
            .follow_up(StagePayload::SourceItem(georgia.clone()))
            .follow_up(StagePayload::SpeciesRecord(SpeciesRecord {
                row_id: String::from("georgia-hash"),
                sppin_key,
                record: RawRecord::new("Ambystoma foo").with_source_item(&georgia),
            }));

        let outcome = execute_stage(&ctx, &message).await.expect("stage 3");

        let [Dispatch::Final(enriched)] = outcome.dispatches.as_slice() else {
            panic!("expected exactly one final record, got {:?}", outcome.dispatches);
        };
        assert_eq!(enriched.row_id, "georgia-hash");
        assert_eq!(enriched.record.state, "Georgia");
        assert_eq!(enriched.taxonomy, committed);
        assert_eq!(enriched.record.taxonomic_category.as_deref(), Some("Amphibians"));
        assert_eq!(outcome.tally.already_resolved, 1);
        assert_eq!(outcome.tally.records_enriched, 1);
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn stage_three_resolves_again_when_the_committed_enrichment_is_unreadable() {
        let http = ScriptedHttpClient::new()
            .route("itis.gov", Ok(HttpResponse::ok_json(r#"{"response":{"docs":[]}}"#)))
            .route("marinespecies.org", Ok(HttpResponse::with_status(204, "")));
        let ctx = context(http.clone(), Vec::new(), Vec::new());
        let sppin_key = SpeciesKey::from_name("Ambystoma foo").expect("key");
        ctx.cache
            .put(&final_result_key(&sppin_key), json!({"done": true}))
            .await
            .expect("seed");
        let message = StageMessage::start_with_run_id("run-1", None)
            .follow_up(StagePayload::SourceItem(item("a1")))
            .follow_up(StagePayload::SpeciesRecord(SpeciesRecord {
                row_id: String::from("hash"),
                sppin_key,
                record: RawRecord::new("Ambystoma foo").with_source_item(&item("a1")),
            }));

        let outcome = execute_stage(&ctx, &message).await.expect("stage 3");

        assert!(matches!(outcome.dispatches.first(), Some(Dispatch::Final(_))));
        assert_eq!(outcome.tally.already_resolved, 0);
        assert_eq!(http.request_count("itis.gov"), 1);
    }

    #[tokio::test]
    async fn mismatched_stage_is_a_contract_violation() {
        let ctx = context(ScriptedHttpClient::new(), Vec::new(), Vec::new());
        let mut message = StageMessage::start_with_run_id("run-1", None);
        message.stage = 2;

        let err = execute_stage(&ctx, &message).await.expect_err("must fail");
        assert!(matches!(err, StageError::Validation(_)));
    }
}
