// crates/sync-engine/src/lib.rs
//! Live sync engine for an external spreadsheet
//!
//! - `ChangeDetector`: per-source snapshots and row-level diffs
//! - `ConflictResolver`: strategy-based reconciliation of local and remote edits
//! - `validate_resolution`: schema checks over resolved rows
//! - `SyncOrchestrator`: poll loop, backoff and retry budget, event fan-out
//! - `EngineSettings`: TOML settings with environment credential fallback
//!
//! # Example
//!
//! ```rust
//! use sheetsync_core::{Row, ASSIGNEE, BRANCH, DATE, HOURS, PROJECT};
//! use sheetsync_engine::ChangeDetector;
//!
//! let row = |hours: i64| {
//!     Row::new()
//!         .with(ASSIGNEE, "Ana")
//!         .with(DATE, "2025-01-01")
//!         .with(PROJECT, "Pantry")
//!         .with(BRANCH, "North")
//!         .with(HOURS, hours)
//! };
//!
//! let mut detector = ChangeDetector::new();
//! detector.initialize_data("sheet:A1:Z", vec![row(2)]);
//!
//! let changes = detector.detect_changes("sheet:A1:Z", vec![row(5)]);
//! assert!(changes.has_changes);
//! assert_eq!(changes.modified.len(), 1);
//! ```

mod config;
mod conflict;
mod detector;
mod engine;
mod error;
mod events;
mod history;
mod local;
mod types;
mod validation;

pub use config::{
    EngineSettings, SyncConfig, SyncConfigUpdate, ValidationError, ACCESS_TOKEN_ENV, API_KEY_ENV,
};
pub use conflict::{
    Conflict, ConflictLogEntry, ConflictResolver, ConflictStats, ConflictStrategy, CustomResolver,
    ResolutionReport, ResolutionSource, ResolvedRow, CONFLICT_LOG_CAPACITY,
};
pub use detector::{diff_fields, ChangeDetector};
pub use engine::{CycleOutcome, CycleSummary, EngineState, SyncOrchestrator, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use events::{EventHandler, EventKind, EventRegistry, Subscription, SyncEvent};
pub use history::{SyncHistory, SyncHistoryEntry, SyncKind, HISTORY_CAPACITY};
pub use local::LocalEditTracker;
pub use types::{
    AddedRow, ChangeMetadata, ChangeRecord, ChangeSet, DatasetSnapshot, DeletedRow, FieldDiff,
    ModifiedRow, RowEdit,
};
pub use validation::{validate_resolution, ValidationIssue, ValidationReport, EXPECTED_FIELDS};
