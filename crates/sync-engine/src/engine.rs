// crates/sync-engine/src/engine.rs
//! Sync orchestrator: poll loop, retry state machine and event fan-out
//!
//! One cycle is fetch, detect, resolve (when local edits are pending),
//! publish, record. At most one cycle body runs at a time; the timer loop
//! and `trigger_sync` both go through the same guard.

use crate::config::{SyncConfig, SyncConfigUpdate};
use crate::conflict::{ConflictResolver, ConflictStats, CustomResolver};
use crate::detector::ChangeDetector;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventKind, EventRegistry, Subscription, SyncEvent};
use crate::history::{SyncHistory, SyncHistoryEntry, SyncKind};
use crate::local::LocalEditTracker;
use crate::types::{DatasetSnapshot, RowEdit};
use crate::validation::validate_resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetsync_core::{IdentityKey, Row};
use sheetsync_resilience::{with_timeout, ResilienceError};
use sheetsync_source::{Credentials, RemoteSource, SourceConfig, SourceConfigUpdate};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Lifecycle state of the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Not polling
    #[default]
    Idle,
    /// Polling at the configured interval
    Running,
    /// Last cycle failed; a retry is scheduled
    ErrorBackoff,
    /// Retry budget exhausted or credentials rejected; needs `start_sync`
    Failed,
}

impl EngineState {
    /// Returns true while the poll loop is live
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Running | EngineState::ErrorBackoff)
    }

    /// Host-facing status label
    pub fn sync_status(&self) -> &'static str {
        match self {
            EngineState::Idle => "stopped",
            EngineState::Running => "running",
            EngineState::ErrorBackoff => "error",
            EngineState::Failed => "failed",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::ErrorBackoff => "error_backoff",
            EngineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: EngineState,
    /// `running`, `stopped`, `error` or `failed`
    pub sync_status: String,
    pub is_running: bool,
    /// Consecutive failed cycles
    pub error_count: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub source_key: Option<String>,
    /// Rows in the current snapshot
    pub snapshot_rows: usize,
    pub pending_local_edits: usize,
}

/// Counts from one completed cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub has_changes: bool,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub unresolved: usize,
}

/// Result of running one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// The engine was stopped, restarted or re-pointed while fetching
    Discarded,
}

struct TimerHandle {
    stop_tx: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl TimerHandle {
    fn stop(self) {
        let _ = self.stop_tx.send(true);
    }
}

struct EngineCore {
    config: SyncConfig,
    source_config: Option<SourceConfig>,
    credentials: Option<Credentials>,
    state: EngineState,
    error_count: u32,
    last_error: Option<String>,
    last_sync: Option<DateTime<Utc>>,
    /// Bumped on start and stop; a cycle that sees a new epoch drops its result
    epoch: u64,
    timer: Option<TimerHandle>,
    detector: ChangeDetector,
    resolver: ConflictResolver,
    local_edits: LocalEditTracker,
    history: SyncHistory,
}

impl EngineCore {
    fn new(config: SyncConfig) -> Self {
        Self {
            config,
            source_config: None,
            credentials: None,
            state: EngineState::Idle,
            error_count: 0,
            last_error: None,
            last_sync: None,
            epoch: 0,
            timer: None,
            detector: ChangeDetector::new(),
            resolver: ConflictResolver::new(),
            local_edits: LocalEditTracker::new(),
            history: SyncHistory::new(),
        }
    }

    fn source_key(&self) -> Option<String> {
        self.source_config.as_ref().map(SourceConfig::source_key)
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }

    /// Wait before the next tick: the poll interval, or the backoff delay
    /// after consecutive failures
    fn next_delay(&self) -> Duration {
        if self.error_count == 0 {
            self.config.poll_interval()
        } else {
            self.config.backoff().delay_for_attempt(self.error_count)
        }
    }

    fn apply_success(
        &mut self,
        kind: SyncKind,
        source_id: &str,
        rows: Vec<Row>,
    ) -> (CycleSummary, Vec<SyncEvent>) {
        let changes = self.detector.detect_changes(source_id, rows);

        let mut conflicts = Vec::new();
        let mut resolved = None;
        let mut validation = None;

        if changes.has_changes && self.local_edits.has_local_changes() {
            let report = self.resolver.resolve_conflicts(
                &self.local_edits.pending(),
                &changes.remote_edits(),
                self.config.conflict_strategy,
            );

            let contested: Vec<IdentityKey> = report.conflicts.iter().map(|c| c.id.clone()).collect();
            self.local_edits.take(&contested);

            let check = validate_resolution(&report.resolved);
            if !check.is_valid {
                log::warn!(
                    "Resolved data for {} failed validation with {} error(s)",
                    source_id,
                    check.errors.len()
                );
            }

            conflicts = report.conflicts;
            resolved = Some(report.resolved);
            validation = Some(check);
        }

        let summary = CycleSummary {
            has_changes: changes.has_changes,
            added: changes.added.len(),
            modified: changes.modified.len(),
            deleted: changes.deleted.len(),
            conflicts: conflicts.len(),
            unresolved: conflicts.iter().filter(|c| !c.is_resolved()).count(),
        };

        self.state = EngineState::Running;
        self.error_count = 0;
        self.last_error = None;
        self.last_sync = Some(Utc::now());
        self.history.push(SyncHistoryEntry::success(
            kind,
            summary.added,
            summary.modified,
            summary.deleted,
            summary.conflicts,
        ));

        log::debug!(
            "Cycle for {}: +{} ~{} -{} ({} conflicts)",
            source_id,
            summary.added,
            summary.modified,
            summary.deleted,
            summary.conflicts
        );

        let mut events = Vec::new();
        if changes.has_changes {
            events.push(SyncEvent::DataChanged {
                timestamp: Utc::now(),
                changes,
                conflicts,
                resolved,
                validation,
            });
        }
        (summary, events)
    }

    fn apply_failure(&mut self, kind: SyncKind, err: &SyncError) -> Vec<SyncEvent> {
        self.error_count += 1;
        let message = err.to_string();
        self.last_error = Some(message.clone());
        self.history.push(SyncHistoryEntry::failure(kind, message.clone()));

        let policy = self.config.backoff();
        let fatal = !err.is_retryable();

        if fatal || policy.is_exhausted(self.error_count) {
            self.state = EngineState::Failed;
            self.stop_timer();

            let reason = if fatal {
                message.clone()
            } else {
                ResilienceError::RetriesExhausted {
                    attempts: self.error_count,
                    last_error: message.clone(),
                }
                .to_string()
            };
            log::error!("Sync failed: {}", reason);

            vec![
                SyncEvent::SyncError {
                    timestamp: Utc::now(),
                    error: message,
                    error_count: self.error_count,
                    retry_in_ms: None,
                },
                SyncEvent::SyncFailed {
                    timestamp: Utc::now(),
                    error: reason,
                    attempts: self.error_count,
                },
            ]
        } else {
            self.state = EngineState::ErrorBackoff;
            let delay = policy.delay_for_attempt(self.error_count);
            log::warn!(
                "Sync cycle failed ({}/{}), retrying in {:?}: {}",
                self.error_count,
                policy.max_retries(),
                delay,
                message
            );

            vec![SyncEvent::SyncError {
                timestamp: Utc::now(),
                error: message,
                error_count: self.error_count,
                retry_in_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            }]
        }
    }
}

struct Inner<S> {
    source: S,
    core: Mutex<EngineCore>,
    events: EventRegistry,
    cycle_guard: tokio::sync::Mutex<()>,
    /// Signalled after a manual cycle so the timer recomputes its wait
    reschedule: Arc<Notify>,
}

impl<S: RemoteSource + 'static> Inner<S> {
    fn core(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_all(&self, events: &[SyncEvent]) {
        for event in events {
            self.events.publish(event);
        }
    }

    async fn fetch(&self, config: &SourceConfig, timeout: Duration) -> SyncResult<Vec<Row>> {
        let range = with_timeout(timeout, self.source.fetch_rows(config)).await??;
        Ok(range.into_rows(&config.column_map))
    }

    async fn run_cycle(&self, kind: SyncKind) -> SyncResult<CycleOutcome> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| SyncError::CycleInProgress)?;

        let (epoch, source_config, timeout) = {
            let core = self.core();
            let source_config = core.source_config.clone().ok_or(SyncError::NotInitialized)?;
            (core.epoch, source_config, core.config.fetch_timeout())
        };

        let fetched = self.fetch(&source_config, timeout).await;

        let (result, events) = {
            let mut core = self.core();
            let superseded = core.epoch != epoch
                || !core.state.is_active()
                || core.source_config.as_ref() != Some(&source_config);
            if superseded {
                log::warn!(
                    "Discarding {} result for {}: engine changed while fetching",
                    self.source.name(),
                    source_config.source_key()
                );
                return Ok(CycleOutcome::Discarded);
            }

            match fetched {
                Ok(rows) => {
                    let (summary, events) =
                        core.apply_success(kind, &source_config.source_key(), rows);
                    (Ok(CycleOutcome::Completed(summary)), events)
                }
                Err(err) => {
                    let events = core.apply_failure(kind, &err);
                    (Err(err), events)
                }
            }
        };

        self.publish_all(&events);
        if kind == SyncKind::Manual {
            self.reschedule.notify_one();
        }
        result
    }
}

async fn run_timer<S: RemoteSource + 'static>(
    weak: Weak<Inner<S>>,
    reschedule: Arc<Notify>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let delay = {
            let Some(inner) = weak.upgrade() else { return };
            let core = inner.core();
            if !core.state.is_active() {
                return;
            }
            core.next_delay()
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = reschedule.notified() => continue,
            _ = stop_rx.changed() => return,
        }

        let Some(inner) = weak.upgrade() else { return };
        if let Err(SyncError::CycleInProgress) = inner.run_cycle(SyncKind::Poll).await {
            log::debug!("Poll tick skipped: cycle in progress");
        }
        drop(inner);

        if *stop_rx.borrow() || stop_rx.has_changed().is_err() {
            return;
        }
    }
}

/// Live sync engine over one remote source
///
/// Cloning yields another handle to the same engine. The poll loop holds
/// only a weak reference, so dropping every handle ends it.
pub struct SyncOrchestrator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SyncOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RemoteSource + 'static> SyncOrchestrator<S> {
    /// Creates an idle engine; fails if `config` is invalid
    pub fn new(source: S, config: SyncConfig) -> SyncResult<Self> {
        config.ensure_valid()?;
        Ok(Self {
            inner: Arc::new(Inner {
                source,
                core: Mutex::new(EngineCore::new(config)),
                events: EventRegistry::new(),
                cycle_guard: tokio::sync::Mutex::new(()),
                reschedule: Arc::new(Notify::new()),
            }),
        })
    }

    /// The remote source this engine polls
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Authenticates, performs the bootstrap fetch and seeds the snapshot
    ///
    /// Publishes `initial_sync` with the full row set. No change records
    /// are produced for the bootstrap data.
    pub async fn initialize(
        &self,
        credentials: Credentials,
        source_config: SourceConfig,
    ) -> SyncResult<DatasetSnapshot> {
        if !source_config.is_configured() {
            return Err(SyncError::Configuration(
                "a spreadsheet id is required".to_string(),
            ));
        }

        let result = self.bootstrap(&credentials, &source_config).await;

        let outcome = {
            let mut core = self.inner.core();
            match result {
                Ok(rows) => {
                    let key = source_config.source_key();
                    if let Some(previous) = core.source_key().filter(|k| *k != key) {
                        core.detector.reset(&previous);
                    }
                    let snapshot = core.detector.initialize_data(&key, rows).clone();

                    core.credentials = Some(credentials);
                    core.source_config = Some(source_config);
                    core.last_sync = Some(snapshot.timestamp);
                    core.last_error = None;
                    core.history.push(SyncHistoryEntry::success(
                        SyncKind::Initial,
                        snapshot.rows.len(),
                        0,
                        0,
                        0,
                    ));
                    Ok(snapshot)
                }
                Err(err) => {
                    core.last_error = Some(err.to_string());
                    core.history
                        .push(SyncHistoryEntry::failure(SyncKind::Initial, err.to_string()));
                    Err(err)
                }
            }
        };

        let snapshot = outcome?;
        log::info!(
            "Initialized {} with {} rows from {}",
            snapshot.source_id,
            snapshot.rows.len(),
            self.inner.source.name()
        );
        self.inner.events.publish(&SyncEvent::InitialSync {
            timestamp: Utc::now(),
            source_id: snapshot.source_id.clone(),
            rows: snapshot.rows.clone(),
            dataset_checksum: snapshot.dataset_checksum.clone(),
        });
        Ok(snapshot)
    }

    async fn bootstrap(
        &self,
        credentials: &Credentials,
        source_config: &SourceConfig,
    ) -> SyncResult<Vec<Row>> {
        self.inner.source.authenticate(credentials).await?;
        let timeout = self.inner.core().config.fetch_timeout();
        self.inner.fetch(source_config, timeout).await
    }

    /// Starts the poll loop; a no-op if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sync(&self) -> SyncResult<()> {
        let poll_interval_ms = {
            let mut core = self.inner.core();
            if core.source_config.is_none() {
                return Err(SyncError::NotInitialized);
            }
            if core.state.is_active() {
                log::warn!("start_sync called while already {}", core.state);
                return Ok(());
            }

            let runtime = Handle::try_current().map_err(|e| SyncError::Runtime(e.to_string()))?;
            core.state = EngineState::Running;
            core.error_count = 0;
            core.epoch += 1;
            core.stop_timer();
            core.timer = Some(self.spawn_timer(&runtime));
            core.config.poll_interval_ms
        };

        log::info!("Sync started, polling every {} ms", poll_interval_ms);
        self.inner.events.publish(&SyncEvent::SyncStarted {
            timestamp: Utc::now(),
            poll_interval_ms,
        });
        Ok(())
    }

    fn spawn_timer(&self, runtime: &Handle) -> TimerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.reschedule),
            stop_rx,
        ));
        TimerHandle {
            stop_tx,
            _task: task,
        }
    }

    /// Stops the poll loop; a no-op if already idle
    ///
    /// A fetch already in flight is not aborted; its result is dropped.
    pub fn stop_sync(&self) {
        {
            let mut core = self.inner.core();
            if core.state == EngineState::Idle {
                log::warn!("stop_sync called while already idle");
                return;
            }
            core.state = EngineState::Idle;
            core.epoch += 1;
            core.stop_timer();
        }

        log::info!("Sync stopped");
        self.inner.events.publish(&SyncEvent::SyncStopped {
            timestamp: Utc::now(),
        });
    }

    /// Runs one cycle now, outside the timer
    ///
    /// Fails with [`SyncError::NotRunning`] unless the engine is running or
    /// backing off, and with [`SyncError::CycleInProgress`] if another
    /// cycle holds the guard.
    pub async fn trigger_sync(&self) -> SyncResult<CycleOutcome> {
        {
            let core = self.inner.core();
            if core.source_config.is_none() {
                return Err(SyncError::NotInitialized);
            }
            if !core.state.is_active() {
                return Err(SyncError::NotRunning(core.state));
            }
        }
        self.inner.run_cycle(SyncKind::Manual).await
    }

    /// Applies a partial config update
    ///
    /// A changed poll interval restarts a running timer with the new value.
    pub fn update_config(&self, update: SyncConfigUpdate) -> SyncResult<()> {
        let mut core = self.inner.core();
        let mut candidate = core.config.clone();
        candidate.merge(update);
        candidate.ensure_valid()?;

        let restart = candidate.poll_interval_ms != core.config.poll_interval_ms
            && core.timer.is_some();
        core.config = candidate;

        if restart {
            let runtime = Handle::try_current().map_err(|e| SyncError::Runtime(e.to_string()))?;
            core.stop_timer();
            core.timer = Some(self.spawn_timer(&runtime));
            log::info!(
                "Poll interval changed to {} ms, timer restarted",
                core.config.poll_interval_ms
            );
        }
        Ok(())
    }

    /// Applies a partial source update
    ///
    /// Re-pointing the engine at another spreadsheet or range discards the
    /// old snapshot; the next cycle reports every row of the new source as
    /// added.
    pub fn update_source_config(&self, update: SourceConfigUpdate) -> SyncResult<()> {
        let mut core = self.inner.core();
        let Some(current) = core.source_config.clone() else {
            return Err(SyncError::NotInitialized);
        };

        let mut candidate = current.clone();
        candidate.merge(update);
        if !candidate.is_configured() {
            return Err(SyncError::Configuration(
                "a spreadsheet id is required".to_string(),
            ));
        }

        if candidate.source_key() != current.source_key() {
            core.detector.reset(&current.source_key());
            log::info!(
                "Source changed from {} to {}",
                current.source_key(),
                candidate.source_key()
            );
        }
        core.source_config = Some(candidate);
        Ok(())
    }

    /// Registers `handler` for events of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    pub fn get_status(&self) -> SyncStatus {
        let core = self.inner.core();
        let source_key = core.source_key();
        let snapshot_rows = source_key
            .as_deref()
            .and_then(|key| core.detector.snapshot(key))
            .map_or(0, |s| s.rows.len());

        SyncStatus {
            state: core.state,
            sync_status: core.state.sync_status().to_string(),
            is_running: core.state.is_active(),
            error_count: core.error_count,
            last_sync: core.last_sync,
            last_error: core.last_error.clone(),
            source_key,
            snapshot_rows,
            pending_local_edits: core.local_edits.len(),
        }
    }

    /// Up to `limit` history entries, newest first
    pub fn get_sync_history(&self, limit: usize) -> Vec<SyncHistoryEntry> {
        self.inner.core().history.recent(limit)
    }

    pub fn get_conflict_stats(&self) -> ConflictStats {
        self.inner.core().resolver.stats()
    }

    /// Current configuration
    pub fn config(&self) -> SyncConfig {
        self.inner.core().config.clone()
    }

    /// Current source configuration, once initialized
    pub fn source_config(&self) -> Option<SourceConfig> {
        self.inner.core().source_config.clone()
    }

    /// Credentials accepted by the last successful `initialize`
    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.core().credentials.clone()
    }

    /// Snapshot of the current source
    pub fn snapshot(&self) -> Option<DatasetSnapshot> {
        let core = self.inner.core();
        let key = core.source_key()?;
        core.detector.snapshot(&key).cloned()
    }

    /// Records a not-yet-synced local edit
    pub fn record_local_edit(&self, id: IdentityKey, data: Row) {
        self.inner.core().local_edits.record(id, data);
    }

    /// Records a local row keyed by its own identity
    pub fn record_local_row(&self, row: Row) -> IdentityKey {
        self.inner.core().local_edits.record_row(row)
    }

    pub fn has_local_changes(&self) -> bool {
        self.inner.core().local_edits.has_local_changes()
    }

    pub fn pending_local_edits(&self) -> Vec<RowEdit> {
        self.inner.core().local_edits.pending()
    }

    pub fn clear_local_edits(&self) {
        self.inner.core().local_edits.clear();
    }

    /// Installs the resolver used by the `custom` strategy
    pub fn set_custom_resolver<F>(&self, resolver: F)
    where
        F: Fn(&RowEdit, &RowEdit) -> Option<Row> + Send + Sync + 'static,
    {
        let resolver: CustomResolver = Arc::new(resolver);
        self.inner.core().resolver.set_custom_resolver(Some(resolver));
    }

    /// Discards the snapshot of the current source
    ///
    /// The next cycle reports every row as added.
    pub fn reset_source(&self) -> bool {
        let mut core = self.inner.core();
        match core.source_key() {
            Some(key) => core.detector.reset(&key),
            None => false,
        }
    }

    /// Stops polling and discards every snapshot
    pub fn shutdown(&self) {
        self.stop_sync();
        self.inner.core().detector.clear();
        log::info!("Sync engine shut down");
    }
}
