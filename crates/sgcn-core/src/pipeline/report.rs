use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::SourceItem;

/// Counters accumulated while driving a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub items_forwarded: usize,
    pub records_forwarded: usize,
    pub duplicates_dropped: usize,
    pub invalid_records: usize,
    pub records_enriched: usize,
    pub unresolved_records: usize,
    pub already_resolved: usize,
    pub final_results_stored: usize,
    pub final_results_existing: usize,
    pub auxiliary_lookups: usize,
    /// Units (items, records, lookups) skipped after an error.
    pub failures: usize,
    /// Source items whose stage 2 ran to completion.
    pub items_completed: Vec<SourceItem>,
    /// Ids of source items with a record that failed in stage 3 or at the
    /// sink. They stay processable so a later run retries them.
    pub failed_items: BTreeSet<String>,
}

impl RunReport {
    pub fn merge(&mut self, other: Self) {
        self.items_forwarded += other.items_forwarded;
        self.records_forwarded += other.records_forwarded;
        self.duplicates_dropped += other.duplicates_dropped;
        self.invalid_records += other.invalid_records;
        self.records_enriched += other.records_enriched;
        self.unresolved_records += other.unresolved_records;
        self.already_resolved += other.already_resolved;
        self.final_results_stored += other.final_results_stored;
        self.final_results_existing += other.final_results_existing;
        self.auxiliary_lookups += other.auxiliary_lookups;
        self.failures += other.failures;
        self.items_completed.extend(other.items_completed);
        self.failed_items.extend(other.failed_items);
    }

    /// Completed items with no failed record.
    pub fn items_to_mark(&self) -> impl Iterator<Item = &SourceItem> {
        self.items_completed
            .iter()
            .filter(move |item| !self.failed_items.contains(&item.source_item_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_counters_and_concatenates_items() {
        let item = SourceItem {
            source_item_id: String::from("a1"),
            state: String::from("Alabama"),
            year: String::from("2015"),
            source_file_url: String::from("https://repo.test/a1.txt"),
            source_file_date: String::new(),
        };
        let mut total = RunReport {
            records_forwarded: 3,
            failures: 1,
            ..RunReport::default()
        };
        total.merge(RunReport {
            records_forwarded: 2,
            items_completed: vec![item.clone()],
            ..RunReport::default()
        });

        assert_eq!(total.records_forwarded, 5);
        assert_eq!(total.failures, 1);
        assert_eq!(total.items_completed, vec![item]);
    }

    #[test]
    fn items_with_a_failed_record_are_not_marked() {
        let item = |id: &str| SourceItem {
            source_item_id: id.to_owned(),
            state: String::from("Alabama"),
            year: String::from("2015"),
            source_file_url: format!("https://repo.test/{id}.txt"),
            source_file_date: String::new(),
        };
        let mut total = RunReport {
            items_completed: vec![item("a1"), item("b2")],
            ..RunReport::default()
        };
        total.merge(RunReport {
            failed_items: BTreeSet::from([String::from("b2")]),
            ..RunReport::default()
        });

        let marked = total.items_to_mark().collect::<Vec<_>>();
        assert_eq!(marked, vec![&item("a1")]);
    }
}
