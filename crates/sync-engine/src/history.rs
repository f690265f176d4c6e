// crates/sync-engine/src/history.rs
//! Bounded record of past sync cycles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of retained history entries
pub const HISTORY_CAPACITY: usize = 50;

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Initial,
    Poll,
    Manual,
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub kind: SyncKind,
    pub success: bool,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncHistoryEntry {
    /// Entry for a successful cycle
    pub fn success(kind: SyncKind, added: usize, modified: usize, deleted: usize, conflicts: usize) -> Self {
        Self {
            kind,
            success: true,
            added,
            modified,
            deleted,
            conflicts,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Entry for a failed cycle
    pub fn failure(kind: SyncKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            added: 0,
            modified: 0,
            deleted: 0,
            conflicts: 0,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// FIFO of the most recent cycles; oldest entries are evicted first
#[derive(Debug, Clone)]
pub struct SyncHistory {
    entries: VecDeque<SyncHistoryEntry>,
    capacity: usize,
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl SyncHistory {
    /// Empty history holding the last [`HISTORY_CAPACITY`] cycles
    pub fn new() -> Self {
        Self::default()
    }

    /// History holding at most `capacity` entries (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: SyncHistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<SyncHistoryEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<&SyncHistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
