// crates/sync-engine/src/local.rs
//! Tracking of local edits not yet reconciled with the remote source

use crate::types::RowEdit;
use sheetsync_core::{IdentityKey, Row};
use std::collections::BTreeMap;

/// Pending local edits keyed by identity
///
/// A second edit to the same key merges field-wise into the first, so each
/// key holds one accumulated edit.
#[derive(Debug, Clone, Default)]
pub struct LocalEditTracker {
    edits: BTreeMap<IdentityKey, Row>,
}

impl LocalEditTracker {
    /// Creates an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edit for `id`
    pub fn record(&mut self, id: IdentityKey, data: Row) {
        match self.edits.get_mut(&id) {
            Some(existing) => {
                for (field, value) in data {
                    existing.insert(field, value);
                }
            }
            None => {
                self.edits.insert(id, data);
            }
        }
    }

    /// Records a full row under its own identity key
    pub fn record_row(&mut self, row: Row) -> IdentityKey {
        let id = row.identity_key();
        self.record(id.clone(), row);
        id
    }

    /// Returns true if any edit is pending
    pub fn has_local_changes(&self) -> bool {
        !self.edits.is_empty()
    }

    /// All pending edits in key order
    pub fn pending(&self) -> Vec<RowEdit> {
        self.edits
            .iter()
            .map(|(id, data)| RowEdit::new(id.clone(), data.clone()))
            .collect()
    }

    /// Pending edit for one key
    pub fn get(&self, id: &IdentityKey) -> Option<&Row> {
        self.edits.get(id)
    }

    /// Removes and returns the edits for `ids`
    pub fn take(&mut self, ids: &[IdentityKey]) -> Vec<RowEdit> {
        ids.iter()
            .filter_map(|id| {
                self.edits
                    .remove(id)
                    .map(|data| RowEdit::new(id.clone(), data))
            })
            .collect()
    }

    /// Clears all pending edits
    pub fn clear(&mut self) {
        self.edits.clear();
    }

    /// Number of pending edits
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}
