// crates/sync-engine/src/detector.rs
//! Snapshot diffing for polled datasets

use crate::types::{
    AddedRow, ChangeMetadata, ChangeSet, DatasetSnapshot, DeletedRow, FieldDiff, ModifiedRow,
};
use chrono::Utc;
use sheetsync_core::{dataset_checksum, IdentityKey, Row};
use std::collections::{BTreeMap, BTreeSet, HashMap};

struct IndexedRow<'a> {
    row: &'a Row,
    checksum: String,
    index: usize,
}

/// Identity-keyed view of a snapshot; the last row wins for duplicate keys
struct RowIndex<'a> {
    entries: HashMap<IdentityKey, IndexedRow<'a>>,
    order: Vec<IdentityKey>,
    duplicates: usize,
}

impl<'a> RowIndex<'a> {
    fn build(rows: &'a [Row]) -> Self {
        let mut entries: HashMap<IdentityKey, IndexedRow<'a>> = HashMap::with_capacity(rows.len());
        let mut duplicates = 0;

        for (index, row) in rows.iter().enumerate() {
            let indexed = IndexedRow {
                row,
                checksum: row.checksum(),
                index,
            };
            if entries.insert(row.identity_key(), indexed).is_some() {
                duplicates += 1;
            }
        }

        let mut order: Vec<IdentityKey> = entries.keys().cloned().collect();
        order.sort_by_key(|key| entries[key].index);

        Self {
            entries,
            order,
            duplicates,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &IndexedRow<'a>)> {
        self.order.iter().map(|key| (key, &self.entries[key]))
    }
}

/// Detects row-level changes between successive fetches of each source
///
/// Holds exactly one snapshot per source id. The detector is an owned
/// value; independent sessions use independent detectors.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    snapshots: HashMap<String, DatasetSnapshot>,
}

impl ChangeDetector {
    /// Creates a detector with no snapshots
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the snapshot for `source_id` without reporting changes
    pub fn initialize_data(&mut self, source_id: &str, rows: Vec<Row>) -> &DatasetSnapshot {
        let checksum = dataset_checksum(&rows);
        let duplicates = RowIndex::build(&rows).duplicates;
        if duplicates > 0 {
            log::warn!(
                "{} duplicate identity key(s) in initial data for {}; last occurrence wins",
                duplicates,
                source_id
            );
        }

        log::debug!("Seeded snapshot for {} with {} rows", source_id, rows.len());
        self.store(source_id, rows, checksum)
    }

    /// Diffs `rows` against the stored snapshot and replaces it
    pub fn detect_changes(&mut self, source_id: &str, rows: Vec<Row>) -> ChangeSet {
        let checksum = dataset_checksum(&rows);
        let detected_at = Utc::now();
        let previous = self.snapshots.get(source_id);
        let previous_checksum = previous.map(|s| s.dataset_checksum.clone());
        let previous_count = previous.map_or(0, |s| s.rows.len());

        if previous_checksum.as_deref() == Some(checksum.as_str()) {
            let metadata = ChangeMetadata {
                source_id: source_id.to_string(),
                previous_count,
                current_count: rows.len(),
                previous_checksum,
                dataset_checksum: checksum.clone(),
                duplicate_keys: 0,
                short_circuited: true,
                detected_at,
            };
            self.store(source_id, rows, checksum);
            return ChangeSet {
                has_changes: false,
                added: Vec::new(),
                modified: Vec::new(),
                deleted: Vec::new(),
                metadata,
            };
        }

        let empty: Vec<Row> = Vec::new();
        let previous_rows = previous.map_or(&empty, |s| &s.rows);
        let old_index = RowIndex::build(previous_rows);
        let new_index = RowIndex::build(&rows);

        if new_index.duplicates > 0 {
            log::warn!(
                "{} duplicate identity key(s) from {}; last occurrence wins",
                new_index.duplicates,
                source_id
            );
        }

        let mut added = Vec::new();
        let mut modified = Vec::new();
        for (key, current) in new_index.iter() {
            match old_index.entries.get(key) {
                None => added.push(AddedRow {
                    id: key.clone(),
                    row: current.row.clone(),
                    index: current.index,
                }),
                Some(old) if old.checksum != current.checksum => modified.push(ModifiedRow {
                    id: key.clone(),
                    row: current.row.clone(),
                    previous_row: old.row.clone(),
                    field_diffs: diff_fields(old.row, current.row),
                    index: current.index,
                }),
                Some(_) => {}
            }
        }

        let deleted: Vec<DeletedRow> = old_index
            .iter()
            .filter(|(key, _)| !new_index.entries.contains_key(*key))
            .map(|(key, old)| DeletedRow {
                id: key.clone(),
                row: old.row.clone(),
                index: old.index,
            })
            .collect();

        let has_changes = !(added.is_empty() && modified.is_empty() && deleted.is_empty());
        let metadata = ChangeMetadata {
            source_id: source_id.to_string(),
            previous_count,
            current_count: rows.len(),
            previous_checksum,
            dataset_checksum: checksum.clone(),
            duplicate_keys: new_index.duplicates,
            short_circuited: false,
            detected_at,
        };

        drop(old_index);
        drop(new_index);
        self.store(source_id, rows, checksum);

        log::debug!(
            "Detected {} added, {} modified, {} deleted for {}",
            added.len(),
            modified.len(),
            deleted.len(),
            source_id
        );

        ChangeSet {
            has_changes,
            added,
            modified,
            deleted,
            metadata,
        }
    }

    /// Returns the stored snapshot for a source
    pub fn snapshot(&self, source_id: &str) -> Option<&DatasetSnapshot> {
        self.snapshots.get(source_id)
    }

    /// Discards the snapshot for a source
    pub fn reset(&mut self, source_id: &str) -> bool {
        self.snapshots.remove(source_id).is_some()
    }

    /// Discards every snapshot
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// Number of sources with a snapshot
    pub fn source_count(&self) -> usize {
        self.snapshots.len()
    }

    fn store(&mut self, source_id: &str, rows: Vec<Row>, checksum: String) -> &DatasetSnapshot {
        let snapshot = DatasetSnapshot {
            source_id: source_id.to_string(),
            rows,
            dataset_checksum: checksum,
            timestamp: Utc::now(),
        };
        self.snapshots.insert(source_id.to_string(), snapshot);
        &self.snapshots[source_id]
    }
}

/// Per-field differences over the union of both rows' field names
pub fn diff_fields(previous: &Row, current: &Row) -> BTreeMap<String, FieldDiff> {
    let names: BTreeSet<&str> = previous.fields().chain(current.fields()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let from = previous.get(name);
            let to = current.get(name);
            (from != to).then(|| {
                (
                    name.to_string(),
                    FieldDiff {
                        from: from.cloned(),
                        to: to.cloned(),
                    },
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sheetsync_core::{ASSIGNEE, BRANCH, DATE, HOURS, PROJECT};

    fn row(assignee: &str, hours: i64) -> Row {
        Row::new()
            .with(ASSIGNEE, assignee)
            .with(DATE, "2025-01-01")
            .with(PROJECT, "P")
            .with(BRANCH, "B")
            .with(HOURS, hours)
    }

    #[test]
    fn test_first_detection_reports_all_added() {
        let mut detector = ChangeDetector::new();
        let changes = detector.detect_changes("s", vec![row("A", 2), row("C", 1)]);

        assert!(changes.has_changes);
        assert_eq!(changes.added.len(), 2);
        assert_eq!(changes.metadata.previous_count, 0);
        assert!(changes.metadata.previous_checksum.is_none());
    }

    #[test]
    fn test_initialize_seeds_without_changes() {
        let mut detector = ChangeDetector::new();
        let snapshot = detector.initialize_data("s", vec![row("A", 2)]);
        assert_eq!(snapshot.rows.len(), 1);

        let changes = detector.detect_changes("s", vec![row("A", 2)]);
        assert!(!changes.has_changes);
        assert!(changes.metadata.short_circuited);
    }

    #[test]
    fn test_added_row() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("s", vec![row("A", 2)]);

        let changes = detector.detect_changes("s", vec![row("A", 2), row("C", 1)]);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].id.as_str(), "C|2025-01-01|P|B");
        assert_eq!(changes.added[0].index, 1);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_modified_row_field_diffs() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("s", vec![row("A", 2)]);

        let changes = detector.detect_changes("s", vec![row("A", 5)]);
        assert_eq!(changes.modified.len(), 1);
        let diffs = &changes.modified[0].field_diffs;
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[HOURS].from, Some(json!(2)));
        assert_eq!(diffs[HOURS].to, Some(json!(5)));
    }

    #[test]
    fn test_field_added_and_removed() {
        let before = row("A", 2).with("notes", "x");
        let after = row("A", 2).with("shift", "am");
        let diffs = diff_fields(&before, &after);

        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs["notes"].to, None);
        assert_eq!(diffs["shift"].from, None);
    }

    #[test]
    fn test_deleted_row() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("s", vec![row("A", 2), row("B", 3)]);

        let changes = detector.detect_changes("s", vec![row("B", 3)]);
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].index, 0);
        assert!(changes.added.is_empty());
    }

    #[test]
    fn test_empty_fetch_deletes_everything() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("s", vec![row("A", 2), row("B", 3)]);

        let changes = detector.detect_changes("s", Vec::new());
        assert_eq!(changes.deleted.len(), 2);
        assert_eq!(changes.metadata.current_count, 0);
    }

    #[test]
    fn test_second_identical_detection_is_idempotent() {
        let mut detector = ChangeDetector::new();
        let rows = vec![row("A", 2), row("B", 3)];
        assert!(detector.detect_changes("s", rows.clone()).has_changes);
        assert!(!detector.detect_changes("s", rows).has_changes);
    }

    #[test]
    fn test_reordered_rows_short_circuit() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("s", vec![row("A", 2), row("B", 3)]);

        let changes = detector.detect_changes("s", vec![row("B", 3), row("A", 2)]);
        assert!(!changes.has_changes);
        let snapshot = detector.snapshot("s").unwrap();
        assert_eq!(snapshot.rows[0].text(ASSIGNEE).as_deref(), Some("B"));
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let mut detector = ChangeDetector::new();
        let changes = detector.detect_changes("s", vec![row("A", 1), row("A", 4)]);

        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].row.number(HOURS), Some(4.0));
        assert_eq!(changes.added[0].index, 1);
        assert_eq!(changes.metadata.duplicate_keys, 1);
    }

    #[test]
    fn test_sources_are_independent() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("one", vec![row("A", 2)]);

        let changes = detector.detect_changes("two", vec![row("A", 2)]);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(detector.source_count(), 2);
    }

    #[test]
    fn test_reset_forgets_snapshot() {
        let mut detector = ChangeDetector::new();
        detector.initialize_data("s", vec![row("A", 2)]);
        assert!(detector.reset("s"));
        assert!(!detector.reset("s"));
        assert!(detector.snapshot("s").is_none());
    }

    #[test]
    fn test_snapshot_timestamp_refreshed_without_changes() {
        let mut detector = ChangeDetector::new();
        let first = detector.initialize_data("s", vec![row("A", 2)]).timestamp;
        std::thread::sleep(std::time::Duration::from_millis(5));
        detector.detect_changes("s", vec![row("A", 2)]);
        assert!(detector.snapshot("s").unwrap().timestamp > first);
    }
}
