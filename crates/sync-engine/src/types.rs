// crates/sync-engine/src/types.rs
//! Snapshot and change-record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sheetsync_core::{IdentityKey, Row};
use std::collections::BTreeMap;

/// The previously seen state of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    /// Source identifier, usually `spreadsheet:range`
    pub source_id: String,
    /// Rows in source order
    pub rows: Vec<Row>,
    /// Change-gate checksum over `rows`
    pub dataset_checksum: String,
    /// When the snapshot was stored
    pub timestamp: DateTime<Utc>,
}

/// A row edit keyed by identity, from either side of a sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEdit {
    pub id: IdentityKey,
    pub data: Row,
}

impl RowEdit {
    /// Creates an edit
    pub fn new(id: IdentityKey, data: Row) -> Self {
        Self { id, data }
    }

    /// Creates an edit keyed by the row's own identity
    pub fn from_row(data: Row) -> Self {
        Self {
            id: data.identity_key(),
            data,
        }
    }
}

/// Before/after values of one field; `None` means the field was absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub from: Option<Value>,
    pub to: Option<Value>,
}

/// Row present in the new snapshot only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedRow {
    pub id: IdentityKey,
    pub row: Row,
    /// Position in the new snapshot
    pub index: usize,
}

/// Row present in both snapshots with different content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedRow {
    pub id: IdentityKey,
    pub row: Row,
    pub previous_row: Row,
    pub field_diffs: BTreeMap<String, FieldDiff>,
    /// Position in the new snapshot
    pub index: usize,
}

/// Row present in the previous snapshot only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedRow {
    pub id: IdentityKey,
    pub row: Row,
    /// Position in the previous snapshot
    pub index: usize,
}

/// One row-level change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeRecord {
    Added(AddedRow),
    Modified(ModifiedRow),
    Deleted(DeletedRow),
}

impl ChangeRecord {
    /// Identity key of the changed row
    pub fn id(&self) -> &IdentityKey {
        match self {
            ChangeRecord::Added(r) => &r.id,
            ChangeRecord::Modified(r) => &r.id,
            ChangeRecord::Deleted(r) => &r.id,
        }
    }
}

/// Facts about one detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    pub source_id: String,
    pub previous_count: usize,
    pub current_count: usize,
    pub previous_checksum: Option<String>,
    pub dataset_checksum: String,
    /// Rows dropped because a later row shared their identity key
    pub duplicate_keys: usize,
    /// True when the dataset checksum matched and no maps were built
    pub short_circuited: bool,
    pub detected_at: DateTime<Utc>,
}

/// Structured diff between two snapshots of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub has_changes: bool,
    pub added: Vec<AddedRow>,
    pub modified: Vec<ModifiedRow>,
    pub deleted: Vec<DeletedRow>,
    pub metadata: ChangeMetadata,
}

impl ChangeSet {
    /// Total number of change records
    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// All records: added, then modified, then deleted
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.added
            .iter()
            .cloned()
            .map(ChangeRecord::Added)
            .chain(self.modified.iter().cloned().map(ChangeRecord::Modified))
            .chain(self.deleted.iter().cloned().map(ChangeRecord::Deleted))
            .collect()
    }

    /// Added and modified rows as remote edits for conflict resolution
    pub fn remote_edits(&self) -> Vec<RowEdit> {
        self.added
            .iter()
            .map(|r| RowEdit::new(r.id.clone(), r.row.clone()))
            .chain(
                self.modified
                    .iter()
                    .map(|r| RowEdit::new(r.id.clone(), r.row.clone())),
            )
            .collect()
    }
}
