//! Behavior-driven tests for content deduplication within one source item.

use sgcn_core::dedup::{canonical_json, content_hash, dedup_records};
use sgcn_core::{Deduplicator, RawRecord, Rejection, SourceItem};
use serde_json::json;

fn item() -> SourceItem {
    SourceItem {
        source_item_id: String::from("56d720ece4b015c306f442d5"),
        state: String::from("Alabama"),
        year: String::from("2015"),
        source_file_url: String::from("https://repo.test/al-2015.txt"),
        source_file_date: String::from("2017-09-25T16:52:21Z"),
    }
}

// =============================================================================
// Deduplication: identical content
// =============================================================================

#[test]
fn when_two_records_have_identical_content_then_exactly_one_is_forwarded() {
    // Given: Two records with identical serialized content
    let first = RawRecord::new("Ambystoma foo").with_common_name("Foo salamander").with_source_item(&item());
    let second = first.clone();

    // When: The batch is deduplicated
    let kept = dedup_records(vec![first.clone(), second]).expect("dedup");

    // Then: One record survives, identified by its content hash
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].1, first);
    assert_eq!(kept[0].0, content_hash(&first).expect("hash"));
}

#[test]
fn when_deduplicated_output_is_deduplicated_again_then_it_is_unchanged() {
    // Given: A batch with repeats interleaved with distinct records
    let names = ["Ambystoma foo", "Lithobates pipiens", "Ambystoma foo", "Anaxyrus fowleri", "Lithobates pipiens"];
    let records = names
        .iter()
        .map(|name| RawRecord::new(*name).with_source_item(&item()))
        .collect::<Vec<_>>();

    // When: Dedup runs once, then again on its own output
    let once = dedup_records(records).expect("first pass");
    let survivors = once.iter().map(|(_, record)| record.clone()).collect::<Vec<_>>();
    let twice = dedup_records(survivors).expect("second pass");

    // Then: The second pass changes nothing and first-seen order holds
    assert_eq!(once, twice);
    let order = twice
        .iter()
        .map(|(_, record)| record.scientific_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["Ambystoma foo", "Lithobates pipiens", "Anaxyrus fowleri"]);
}

#[test]
fn when_records_differ_only_in_key_order_then_hashes_match() {
    // Given: The same content with keys in different orders
    let left = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
    let right = json!({"a": {"x": null, "y": [1, 2]}, "b": 1});

    // Then: The canonical form and hash are identical
    assert_eq!(canonical_json(&left).expect("left"), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    assert_eq!(content_hash(&left).expect("left"), content_hash(&right).expect("right"));
}

// =============================================================================
// Deduplication: validity gate
// =============================================================================

#[test]
fn when_an_invalid_record_precedes_its_valid_twin_then_the_valid_one_is_forwarded() {
    // Given: A deduplicator for one source item
    let mut deduplicator = Deduplicator::new();
    let record = RawRecord::new("Ambystoma foo").with_source_item(&item());

    // When: The same content is first rejected by validation, then admitted
    let invalid = deduplicator.admit(&record, false).expect("hash");
    let valid = deduplicator.admit(&record, true).expect("hash");
    let repeat = deduplicator.admit(&record, true).expect("hash");

    // Then: Only the valid admission claims the hash
    assert_eq!(invalid, Err(Rejection::Invalid));
    assert!(valid.is_ok());
    assert_eq!(repeat, Err(Rejection::Duplicate));
    assert_eq!(deduplicator.len(), 1);
}
