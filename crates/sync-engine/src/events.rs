// crates/sync-engine/src/events.rs
//! Publish/subscribe registry for engine events
//!
//! Handlers are registered per [`EventKind`]. Each handler runs inside its
//! own panic boundary: a panicking subscriber is logged and the remaining
//! subscribers of the same event are still notified.

use crate::conflict::{Conflict, ResolvedRow};
use crate::error::SyncError;
use crate::types::ChangeSet;
use crate::validation::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetsync_core::Row;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Event handler callback
pub type EventHandler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Event type used as the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InitialSync,
    DataChanged,
    SyncStarted,
    SyncStopped,
    SyncError,
    SyncFailed,
}

impl EventKind {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InitialSync => "initial_sync",
            EventKind::DataChanged => "data_changed",
            EventKind::SyncStarted => "sync_started",
            EventKind::SyncStopped => "sync_stopped",
            EventKind::SyncError => "sync_error",
            EventKind::SyncFailed => "sync_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Bootstrap fetch completed and seeded the snapshot
    InitialSync {
        timestamp: DateTime<Utc>,
        source_id: String,
        rows: Vec<Row>,
        dataset_checksum: String,
    },
    /// A cycle found remote changes
    DataChanged {
        timestamp: DateTime<Utc>,
        changes: ChangeSet,
        conflicts: Vec<Conflict>,
        /// Present only when local edits were reconciled
        resolved: Option<Vec<ResolvedRow>>,
        validation: Option<ValidationReport>,
    },
    SyncStarted {
        timestamp: DateTime<Utc>,
        poll_interval_ms: u64,
    },
    SyncStopped {
        timestamp: DateTime<Utc>,
    },
    /// A cycle failed; `retry_in_ms` is absent when no retry is scheduled
    SyncError {
        timestamp: DateTime<Utc>,
        error: String,
        error_count: u32,
        retry_in_ms: Option<u64>,
    },
    /// Retry budget exhausted or credentials rejected; polling stopped
    SyncFailed {
        timestamp: DateTime<Utc>,
        error: String,
        attempts: u32,
    },
}

impl SyncEvent {
    /// Registry key for this event
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::InitialSync { .. } => EventKind::InitialSync,
            SyncEvent::DataChanged { .. } => EventKind::DataChanged,
            SyncEvent::SyncStarted { .. } => EventKind::SyncStarted,
            SyncEvent::SyncStopped { .. } => EventKind::SyncStopped,
            SyncEvent::SyncError { .. } => EventKind::SyncError,
            SyncEvent::SyncFailed { .. } => EventKind::SyncFailed,
        }
    }

    /// When the event was produced
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::InitialSync { timestamp, .. }
            | SyncEvent::DataChanged { timestamp, .. }
            | SyncEvent::SyncStarted { timestamp, .. }
            | SyncEvent::SyncStopped { timestamp }
            | SyncEvent::SyncError { timestamp, .. }
            | SyncEvent::SyncFailed { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Default)]
struct Handlers {
    next_id: u64,
    by_kind: BTreeMap<EventKind, Vec<(u64, EventHandler)>>,
}

/// Event type to handler set
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<Mutex<Handlers>>,
}

impl EventRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `handler` for `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers();
        handlers.next_id += 1;
        let id = handlers.next_id;
        handlers
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Number of handlers registered for `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers().by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler registered for its kind
    ///
    /// Returns the number of handlers that panicked.
    pub fn publish(&self, event: &SyncEvent) -> usize {
        let kind = event.kind();
        // Handlers may subscribe or unsubscribe while being called.
        let snapshot: Vec<EventHandler> = self
            .handlers()
            .by_kind
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        let mut failures = 0;
        for handler in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                failures += 1;
                let err = SyncError::Subscriber {
                    event: kind.to_string(),
                    message: panic_message(payload.as_ref()),
                };
                log::error!("{}", err);
            }
        }
        failures
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers();
        let counts: BTreeMap<EventKind, usize> = handlers
            .by_kind
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventRegistry").field("handlers", &counts).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to
/// remove the handler
///
/// Dropping the handle keeps the handler registered.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Handlers>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Event type this subscription listens to
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the handler; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut handlers = registry.lock().unwrap_or_else(|p| p.into_inner());
        let Some(list) = handlers.by_kind.get_mut(&self.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        before != list.len()
    }
}
