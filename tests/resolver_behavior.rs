//! Behavior-driven tests for taxonomic resolution with fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use sgcn_core::cache::lookup_key;
use sgcn_core::{
    AuxiliarySources, CacheStore, Fetcher, HttpResponse, MemoryCacheStore, RawRecord, ResolutionRequest, ResolveError,
    ScriptedHttpClient, SourceDescriptor, SourceId, SourcePolicies, SpeciesKey, TaxonomicResolver,
};

const UNIT: Duration = Duration::from_millis(15);

fn resolver(http: &ScriptedHttpClient, cache: &MemoryCacheStore) -> TaxonomicResolver {
    let fetcher = Fetcher::new(Arc::new(http.clone()), SourcePolicies::for_time_unit(UNIT));
    TaxonomicResolver::new(Arc::new(cache.clone()), fetcher, AuxiliarySources::default())
}

fn request_for(record: &RawRecord) -> ResolutionRequest {
    ResolutionRequest {
        key: record.species_key().expect("key"),
        scientific_name: record.lookup_name().to_owned(),
        common_name: record.common_name.clone(),
        descriptor: SourceDescriptor::for_record(record),
    }
}

fn itis_without_valid_entries() -> String {
    json!({"response": {"docs": [{
        "tsn": "999999",
        "nameWInd": "Ambystoma foo Smith, 1900",
        "nameWOInd": "Ambystoma foo",
        "usage": "invalid",
        "rank": "Species",
        "hierarchySoFarWRanks": ["999999:$Kingdom$Animalia$Class$Reptilia$"],
        "vernacular": []
    }]}})
    .to_string()
}

fn worms_accepted() -> String {
    json!([{
        "AphiaID": 1_234_567,
        "url": "https://www.marinespecies.org/aphia.php?p=taxdetails&id=1234567",
        "scientificname": "Ambystoma foo",
        "status": "accepted",
        "rank": "Species",
        "kingdom": "Animalia",
        "phylum": "Chordata",
        "class": "Amphibia",
        "order": "Caudata",
        "family": "Ambystomatidae",
        "genus": "Ambystoma"
    }])
    .to_string()
}

// =============================================================================
// Resolver: fallback to the secondary authority
// =============================================================================

#[tokio::test]
async fn when_itis_has_no_valid_entry_then_worms_supplies_the_class() {
    // Given: A record with no override, ITIS reporting only an invalid usage,
    // and WoRMS reporting one accepted row
    let http = ScriptedHttpClient::new()
        .route("services.itis.gov", Ok(HttpResponse::ok_json(itis_without_valid_entries())))
        .route("marinespecies.org", Ok(HttpResponse::ok_json(worms_accepted())));
    let cache = MemoryCacheStore::new();
    let record = RawRecord::new("Ambystoma foo");

    // When: The record is resolved
    let request = request_for(&record);
    let resolution = resolver(&http, &cache).resolve(&request).await.expect("resolve");

    // Then: The key is name-based and the summary comes from WoRMS only
    assert_eq!(request.key.as_str(), "Name:ambystoma foo");
    let summary = resolution.summary;
    assert_eq!(summary.class_name, "Amphibia");
    assert_eq!(summary.authority, Some(SourceId::Worms));
    assert_eq!(summary.authority_id.as_deref(), Some("1234567"));
    assert_eq!(summary.source_chain, vec![SourceId::Itis, SourceId::Worms]);
    assert_ne!(summary.authority, Some(SourceId::Itis));

    // And: Both responses are memoized under their own namespaces
    for source in SourceId::AUTHORITIES {
        let key = lookup_key(source, &request.key);
        assert!(cache.get(&key).await.expect("get").is_some(), "{key} not cached");
    }
}

#[tokio::test]
async fn when_neither_authority_accepts_the_name_then_class_is_none() {
    // Given: Both authorities without an accepted entry
    let http = ScriptedHttpClient::new()
        .route("services.itis.gov", Ok(HttpResponse::ok_json(r#"{"response":{"docs":[]}}"#)))
        .route("marinespecies.org", Ok(HttpResponse::with_status(204, "")));
    let cache = MemoryCacheStore::new();
    let record = RawRecord::new("Nomen dubium").with_common_name("Mystery newt");

    // When: The record is resolved
    let resolution = resolver(&http, &cache)
        .resolve(&request_for(&record))
        .await
        .expect("unresolved is not an error");

    // Then: The summary is tagged unresolved and keeps the reported common name
    assert!(!resolution.summary.is_resolved());
    assert_eq!(resolution.summary.class_name, "none");
    assert_eq!(resolution.summary.commonname.as_deref(), Some("Mystery newt"));
}

#[tokio::test]
async fn when_an_authority_answers_with_no_entries_then_nothing_is_memoized() {
    // Given: ITIS with zero docs and WoRMS with zero rows
    let http = ScriptedHttpClient::new()
        .route("services.itis.gov", Ok(HttpResponse::ok_json(r#"{"response":{"docs":[]}}"#)))
        .route("marinespecies.org", Ok(HttpResponse::ok_json("[]")));
    let cache = MemoryCacheStore::new();
    let resolver = resolver(&http, &cache);
    let request = request_for(&RawRecord::new("Ambystoma foo"));

    // When: The name is resolved twice
    resolver.resolve(&request).await.expect("first resolve");
    resolver.resolve(&request).await.expect("second resolve");

    // Then: No lookup entry was written, so each attempt asked again
    assert!(cache.get(&lookup_key(SourceId::Itis, &request.key)).await.expect("get").is_none());
    assert!(cache.get(&lookup_key(SourceId::Worms, &request.key)).await.expect("get").is_none());
    assert!(cache.is_empty());
    assert_eq!(http.request_count("services.itis.gov"), 2);
    assert_eq!(http.request_count("marinespecies.org"), 2);
}

#[tokio::test]
async fn when_a_record_carries_an_override_then_itis_is_queried_by_tsn() {
    // Given: A record with an explicit ITIS identifier
    let itis = json!({"response": {"docs": [{
        "tsn": "173420",
        "nameWInd": "Lithobates pipiens (Schreber, 1782)",
        "nameWOInd": "Lithobates pipiens",
        "usage": "valid",
        "rank": "Species",
        "hierarchySoFarWRanks": ["173420:$Kingdom$Animalia$Class$Amphibia$Order$Anura$"],
        "vernacular": ["Northern Leopard Frog$English$N$152846$"]
    }]}});
    let http = ScriptedHttpClient::new().route("services.itis.gov", Ok(HttpResponse::ok_json(itis.to_string())));
    let cache = MemoryCacheStore::new();
    let record = RawRecord::new("Rana pipiens").with_itis_identifier("173420");

    // When: The record is resolved
    let request = request_for(&record);
    let resolution = resolver(&http, &cache).resolve(&request).await.expect("resolve");

    // Then: The TSN key drives the query and ITIS answers
    assert_eq!(request.key, SpeciesKey::from_tsn("173420").expect("key"));
    assert!(http.requests()[0].url.contains("tsn%3A173420"));
    assert_eq!(resolution.summary.authority, Some(SourceId::Itis));
    assert_eq!(resolution.summary.commonname.as_deref(), Some("Northern Leopard Frog"));
    assert_eq!(http.request_count("marinespecies.org"), 0);
}

#[tokio::test]
async fn when_the_primary_authority_keeps_failing_then_the_error_propagates() {
    // Given: ITIS answering 503 on every attempt
    let http = ScriptedHttpClient::new().route("services.itis.gov", Ok(HttpResponse::with_status(503, "")));
    let cache = MemoryCacheStore::new();

    // When: A record is resolved
    let err = resolver(&http, &cache)
        .resolve(&request_for(&RawRecord::new("Ambystoma foo")))
        .await
        .expect_err("exhaustion is fatal to the resolution");

    // Then: The fetch error surfaces, WoRMS is not consulted, nothing is cached
    assert!(matches!(err, ResolveError::Fetch(_)));
    assert_eq!(http.request_count("marinespecies.org"), 0);
    assert!(cache.is_empty());
}

// =============================================================================
// Resolver: pacing of the secondary authority
// =============================================================================

#[tokio::test]
async fn when_worms_is_consulted_n_times_then_elapsed_time_covers_the_spacing() {
    // Given: Resolutions that always fall back to WoRMS
    let http = ScriptedHttpClient::new()
        .route("services.itis.gov", Ok(HttpResponse::ok_json(itis_without_valid_entries())))
        .route("marinespecies.org", Ok(HttpResponse::ok_json(worms_accepted())));
    let cache = MemoryCacheStore::new();
    let resolver = resolver(&http, &cache);
    let attempts = 4_u32;

    // When: The same name is resolved repeatedly, hitting the cache after the
    // first time
    let started = Instant::now();
    for _ in 0..attempts {
        resolver
            .resolve(&request_for(&RawRecord::new("Ambystoma foo")))
            .await
            .expect("resolve");
    }

    // Then: WoRMS was fetched once, yet every attempt was paced
    assert_eq!(http.request_count("marinespecies.org"), 1);
    assert!(
        started.elapsed() >= UNIT * (attempts - 1),
        "elapsed={:?}",
        started.elapsed()
    );
}
