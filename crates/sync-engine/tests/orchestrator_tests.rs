// crates/sync-engine/tests/orchestrator_tests.rs
//! Integration tests for the sync orchestrator
//!
//! Timer-driven tests run on a paused clock, so sleeps advance virtual time
//! and retry delays can be asserted exactly.

use serde_json::json;
use sheetsync_core::{Row, ASSIGNEE, BRANCH, DATE, HOURS, IS_MEMBER, PROJECT};
use sheetsync_engine::{
    ConflictStrategy, CycleOutcome, EngineState, EventKind, ResolutionSource, Subscription,
    SyncConfig, SyncConfigUpdate, SyncError, SyncEvent, SyncKind, SyncOrchestrator,
};
use sheetsync_source::{Credentials, FetchedRange, MemorySource, SourceConfig, SourceError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

type Engine = SyncOrchestrator<MemorySource>;

fn grid(rows: &[(&str, i64)]) -> FetchedRange {
    let mut values = vec![vec![
        json!("Assignee"),
        json!("Date"),
        json!("Project"),
        json!("Branch"),
        json!("Hours"),
    ]];
    for (assignee, hours) in rows {
        values.push(vec![
            json!(assignee),
            json!("2025-01-01"),
            json!("P"),
            json!("B"),
            json!(hours),
        ]);
    }
    FetchedRange::from_values(values)
}

fn row(assignee: &str) -> Row {
    Row::new()
        .with(ASSIGNEE, assignee)
        .with(DATE, "2025-01-01")
        .with(PROJECT, "P")
        .with(BRANCH, "B")
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 1000,
        max_retries: 3,
        ..Default::default()
    }
}

async fn initialized(source: &MemorySource, config: SyncConfig) -> Engine {
    let engine = SyncOrchestrator::new(source.clone(), config).unwrap();
    engine
        .initialize(Credentials::api_key("key"), SourceConfig::new("volunteers"))
        .await
        .unwrap();
    engine
}

fn collect(engine: &Engine, kind: EventKind) -> (Subscription, mpsc::UnboundedReceiver<SyncEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = engine.subscribe(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    (sub, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_initialize_publishes_initial_sync() {
    let source = MemorySource::new(grid(&[("A", 2), ("B", 3)]));
    let engine = SyncOrchestrator::new(source, SyncConfig::default()).unwrap();
    let (_sub, mut rx) = collect(&engine, EventKind::InitialSync);

    engine
        .initialize(Credentials::api_key("key"), SourceConfig::new("volunteers"))
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        SyncEvent::InitialSync { rows, source_id, .. } => {
            assert_eq!(rows.len(), 2);
            assert_eq!(source_id, "volunteers:Sheet1!A1:Z");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let history = engine.get_sync_history(10);
    assert_eq!(history[0].kind, SyncKind::Initial);
    assert_eq!(history[0].added, 2);
}

#[tokio::test]
async fn test_initialize_requires_source_id() {
    let engine = SyncOrchestrator::new(MemorySource::default(), SyncConfig::default()).unwrap();

    let err = engine
        .initialize(Credentials::api_key("key"), SourceConfig::new(""))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Configuration(_)));
}

#[tokio::test]
async fn test_initialize_rejects_bad_credentials() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    source.require_api_key("secret");
    let engine = SyncOrchestrator::new(source.clone(), SyncConfig::default()).unwrap();

    let err = engine
        .initialize(Credentials::api_key("wrong"), SourceConfig::new("volunteers"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Authentication(_)));
    assert_eq!(source.fetch_count(), 0);
    assert!(engine.get_status().last_error.is_some());
    assert!(matches!(engine.start_sync(), Err(SyncError::NotInitialized)));
}

#[tokio::test(start_paused = true)]
async fn test_poll_reports_added_row() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;
    let (_sub, mut rx) = collect(&engine, EventKind::DataChanged);

    engine.start_sync().unwrap();
    source.set_range(grid(&[("A", 2), ("C", 1)]));
    sleep(Duration::from_millis(1500)).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let SyncEvent::DataChanged {
        changes,
        conflicts,
        resolved,
        ..
    } = &events[0]
    else {
        panic!("expected data_changed");
    };
    assert_eq!(changes.added.len(), 1);
    assert!(changes.modified.is_empty() && changes.deleted.is_empty());
    assert!(conflicts.is_empty());
    assert!(resolved.is_none());

    // Unchanged data produces no further data_changed events
    sleep(Duration::from_millis(3000)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(engine.get_status().snapshot_rows, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_fails_once() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;
    let (_errors, mut error_rx) = collect(&engine, EventKind::SyncError);
    let (_failed, mut failed_rx) = collect(&engine, EventKind::SyncFailed);

    source.fail_always(SourceError::Fetch("connection reset".to_string()));
    engine.start_sync().unwrap();
    sleep(Duration::from_secs(10)).await;

    let errors = drain(&mut error_rx);
    let failures = drain(&mut failed_rx);
    assert_eq!(errors.len(), 3);
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        SyncEvent::SyncFailed { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("unexpected event: {:?}", other),
    }

    let status = engine.get_status();
    assert!(!status.is_running);
    assert_eq!(status.state, EngineState::Failed);
    assert_eq!(status.sync_status, "failed");
    assert_eq!(status.error_count, 3);

    // One bootstrap fetch plus three failed polls, then nothing
    assert_eq!(source.fetch_count(), 4);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(source.fetch_count(), 4);
    assert!(drain(&mut error_rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_grow() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;
    let (_errors, mut error_rx) = collect(&engine, EventKind::SyncError);

    source.fail_always(SourceError::Fetch("timeout".to_string()));
    let started = Instant::now();
    engine.start_sync().unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(source.fetch_count(), 2);

    // Retry 1 waits 1000 ms
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(source.fetch_count(), 3);

    // Retry 2 waits 2000 ms, so nothing happens in the first 1500
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(source.fetch_count(), 3);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(source.fetch_count(), 4);
    assert!(started.elapsed() >= Duration::from_millis(4000));

    let retry_delays: Vec<Option<u64>> = drain(&mut error_rx)
        .into_iter()
        .map(|event| match event {
            SyncEvent::SyncError { retry_in_ms, .. } => retry_in_ms,
            _ => None,
        })
        .collect();
    assert_eq!(retry_delays, vec![Some(1000), Some(2000), None]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trigger_reschedules_timer() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let config = SyncConfig {
        max_retries: 5,
        ..fast_config()
    };
    let engine = initialized(&source, config).await;
    let (_errors, mut error_rx) = collect(&engine, EventKind::SyncError);

    source.fail_always(SourceError::Fetch("timeout".to_string()));
    engine.start_sync().unwrap();

    // Timer failure at 1000 ms schedules a retry at 2000 ms
    sleep(Duration::from_millis(1900)).await;
    assert_eq!(source.fetch_count(), 2);

    assert!(engine.trigger_sync().await.is_err());
    assert_eq!(source.fetch_count(), 3);

    let retry_delays: Vec<Option<u64>> = drain(&mut error_rx)
        .into_iter()
        .map(|event| match event {
            SyncEvent::SyncError { retry_in_ms, .. } => retry_in_ms,
            _ => None,
        })
        .collect();
    assert_eq!(retry_delays, vec![Some(1000), Some(2000)]);

    // The announced 2000 ms wait starts from the manual failure
    sleep(Duration::from_millis(1900)).await;
    assert_eq!(source.fetch_count(), 3);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(source.fetch_count(), 4);
    assert_eq!(engine.get_status().error_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resets_error_count() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;

    source.push_failure(SourceError::Fetch("blip".to_string()));
    engine.start_sync().unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(engine.get_status().state, EngineState::ErrorBackoff);
    assert_eq!(engine.get_status().sync_status, "error");

    sleep(Duration::from_millis(1000)).await;
    let status = engine.get_status();
    assert_eq!(status.state, EngineState::Running);
    assert_eq!(status.error_count, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_authentication_error_fails_immediately() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;
    let (_failed, mut failed_rx) = collect(&engine, EventKind::SyncFailed);

    source.fail_always(SourceError::Authentication("token expired".to_string()));
    engine.start_sync().unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(drain(&mut failed_rx).len(), 1);
    assert_eq!(engine.get_status().state, EngineState::Failed);
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_failure() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;

    source.fail_always(SourceError::Fetch("down".to_string()));
    engine.start_sync().unwrap();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.get_status().state, EngineState::Failed);

    source.clear_failures();
    engine.start_sync().unwrap();
    let status = engine.get_status();
    assert!(status.is_running);
    assert_eq!(status.error_count, 0);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(engine.get_status().state, EngineState::Running);
}

#[tokio::test]
async fn test_trigger_requires_running_engine() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;

    let err = engine.trigger_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::NotRunning(EngineState::Idle)));
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_runs_one_cycle() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    engine.start_sync().unwrap();

    source.set_range(grid(&[("A", 7)]));
    let outcome = engine.trigger_sync().await.unwrap();

    match outcome {
        CycleOutcome::Completed(summary) => {
            assert!(summary.has_changes);
            assert_eq!(summary.modified, 1);
        }
        CycleOutcome::Discarded => panic!("cycle was discarded"),
    }
    assert_eq!(engine.get_sync_history(1)[0].kind, SyncKind::Manual);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_trigger_is_rejected() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    engine.start_sync().unwrap();
    source.set_latency(Duration::from_millis(500));

    let (first, second) = tokio::join!(engine.trigger_sync(), engine.trigger_sync());

    assert!(matches!(first, Ok(CycleOutcome::Completed(_))));
    assert!(matches!(second, Err(SyncError::CycleInProgress)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_result() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    let (_sub, mut rx) = collect(&engine, EventKind::DataChanged);
    engine.start_sync().unwrap();

    source.set_range(grid(&[("A", 2), ("B", 1)]));
    source.set_latency(Duration::from_millis(500));

    let stopper = engine.clone();
    let (outcome, _) = tokio::join!(engine.trigger_sync(), async move {
        sleep(Duration::from_millis(100)).await;
        stopper.stop_sync();
    });

    assert_eq!(outcome.unwrap(), CycleOutcome::Discarded);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(engine.get_status().snapshot_rows, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    let (_started, mut started_rx) = collect(&engine, EventKind::SyncStarted);
    let (_stopped, mut stopped_rx) = collect(&engine, EventKind::SyncStopped);

    engine.start_sync().unwrap();
    engine.start_sync().unwrap();
    engine.stop_sync();
    engine.stop_sync();

    assert_eq!(drain(&mut started_rx).len(), 1);
    assert_eq!(drain(&mut stopped_rx).len(), 1);
    assert_eq!(engine.get_status().sync_status, "stopped");
}

#[tokio::test(start_paused = true)]
async fn test_interval_update_restarts_timer() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    engine.start_sync().unwrap();

    engine
        .update_config(SyncConfigUpdate::default().poll_interval_ms(200))
        .unwrap();
    sleep(Duration::from_millis(1100)).await;

    // Five polls at 200 ms instead of none at the 30 s default
    assert_eq!(source.fetch_count(), 1 + 5);
    assert_eq!(engine.config().poll_interval_ms, 200);

    let err = engine
        .update_config(SyncConfigUpdate::default().max_retries(0))
        .unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(engine.config().max_retries, 3);
}

#[tokio::test(start_paused = true)]
async fn test_local_edit_resolved_with_hours_sum() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let config = SyncConfig {
        conflict_strategy: ConflictStrategy::HoursSum,
        ..Default::default()
    };
    let engine = initialized(&source, config).await;
    let (_sub, mut rx) = collect(&engine, EventKind::DataChanged);
    engine.start_sync().unwrap();

    engine.record_local_row(row("A").with(HOURS, 3));
    engine.record_local_row(row("Z").with(HOURS, 1));
    source.set_range(grid(&[("A", 5)]));
    engine.trigger_sync().await.unwrap();

    let events = drain(&mut rx);
    let SyncEvent::DataChanged {
        conflicts,
        resolved,
        validation,
        ..
    } = &events[0]
    else {
        panic!("expected data_changed");
    };
    assert_eq!(conflicts.len(), 1);
    let resolved = resolved.as_ref().unwrap();
    assert_eq!(resolved[0].source, ResolutionSource::Resolved);
    assert_eq!(resolved[0].data.get(HOURS), Some(&json!(8)));
    assert!(validation.as_ref().unwrap().is_valid);

    // The contested edit is consumed, the local-only one stays pending
    let pending = engine.pending_local_edits();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].data.text(ASSIGNEE).as_deref(), Some("Z"));

    let stats = engine.get_conflict_stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.resolved, 1);
}

#[tokio::test(start_paused = true)]
async fn test_merge_fields_through_engine() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let config = SyncConfig {
        conflict_strategy: ConflictStrategy::MergeFields,
        ..Default::default()
    };
    let engine = initialized(&source, config).await;
    let (_sub, mut rx) = collect(&engine, EventKind::DataChanged);
    engine.start_sync().unwrap();

    let id = row("A").identity_key();
    engine.record_local_edit(id, Row::new().with(IS_MEMBER, true));
    source.set_range(grid(&[("A", 4)]));
    engine.trigger_sync().await.unwrap();

    let events = drain(&mut rx);
    let SyncEvent::DataChanged { resolved, .. } = &events[0] else {
        panic!("expected data_changed");
    };
    let merged = &resolved.as_ref().unwrap()[0].data;
    assert_eq!(merged.get(IS_MEMBER), Some(&json!(true)));
    assert_eq!(merged.number(HOURS), Some(4.0));
    assert!(!engine.has_local_changes());
}

#[tokio::test(start_paused = true)]
async fn test_custom_resolver_receives_both_sides() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let config = SyncConfig {
        conflict_strategy: ConflictStrategy::Custom,
        ..Default::default()
    };
    let engine = initialized(&source, config).await;
    engine.set_custom_resolver(|local, remote| {
        let hours = local.data.number(HOURS)?.max(remote.data.number(HOURS)?);
        Some(remote.data.clone().with(HOURS, hours))
    });
    engine.start_sync().unwrap();

    engine.record_local_row(row("A").with(HOURS, 9));
    source.set_range(grid(&[("A", 4)]));
    let outcome = engine.trigger_sync().await.unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::Completed(summary) if summary.conflicts == 1 && summary.unresolved == 0
    ));
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_block_others() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = SyncOrchestrator::new(source, SyncConfig::default()).unwrap();
    let _bad = engine.subscribe(EventKind::InitialSync, |_| panic!("listener bug"));
    let (_good, mut rx) = collect(&engine, EventKind::InitialSync);

    engine
        .initialize(Credentials::api_key("key"), SourceConfig::new("volunteers"))
        .await
        .unwrap();

    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = SyncOrchestrator::new(source, SyncConfig::default()).unwrap();
    let (sub, mut rx) = collect(&engine, EventKind::InitialSync);

    assert!(sub.unsubscribe());
    engine
        .initialize(Credentials::api_key("key"), SourceConfig::new("volunteers"))
        .await
        .unwrap();

    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded_and_newest_first() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    engine.start_sync().unwrap();

    for hours in 0..60 {
        source.set_range(grid(&[("A", hours)]));
        engine.trigger_sync().await.unwrap();
    }

    let history = engine.get_sync_history(100);
    assert_eq!(history.len(), 50);
    assert!(history.iter().all(|e| e.kind == SyncKind::Manual));
    assert_eq!(engine.get_sync_history(5).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_reset_source_reports_everything_added() {
    let source = MemorySource::new(grid(&[("A", 2), ("B", 1)]));
    let engine = initialized(&source, SyncConfig::default()).await;
    engine.start_sync().unwrap();

    assert!(engine.reset_source());
    let outcome = engine.trigger_sync().await.unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::Completed(summary) if summary.added == 2
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_clears_snapshots() {
    let source = MemorySource::new(grid(&[("A", 2)]));
    let engine = initialized(&source, fast_config()).await;
    engine.start_sync().unwrap();

    engine.shutdown();

    assert!(engine.snapshot().is_none());
    assert!(!engine.get_status().is_running);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(source.fetch_count(), 1);
}
