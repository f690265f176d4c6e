// crates/cli/src/commands.rs

use anyhow::{bail, Context, Result};
use console::style;
use sheetsync_engine::{
    EngineSettings, EventKind, Subscription, SyncConfigUpdate, SyncEvent, SyncOrchestrator,
    ValidationError,
};
use sheetsync_source::SheetsSource;

const ALL_EVENTS: [EventKind; 6] = [
    EventKind::InitialSync,
    EventKind::DataChanged,
    EventKind::SyncStarted,
    EventKind::SyncStopped,
    EventKind::SyncError,
    EventKind::SyncFailed,
];

/// Validate the settings file and print the effective values
pub fn check_config(config_path: &str) -> Result<()> {
    let settings = load_settings(config_path)?;

    println!("{} Settings in {} are valid", style("✓").green().bold(), config_path);
    println!("{}", format_settings(&settings));
    Ok(())
}

/// Fetch the spreadsheet once and print a summary
pub async fn run_once(config_path: &str, json: bool) -> Result<()> {
    let settings = load_settings(config_path)?;
    let engine = build_engine(&settings)?;

    let snapshot = engine
        .initialize(settings.credentials.clone(), settings.source.clone())
        .await
        .context("Initial sync failed")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&snapshot.rows).context("Failed to encode rows")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("\n{} {}", style("Source:").bold(), snapshot.source_id);
    println!("{} {}", style("Rows:").bold(), style(snapshot.rows.len()).cyan());
    println!("{} {}", style("Checksum:").bold(), snapshot.dataset_checksum);
    println!(
        "{} {}",
        style("Fetched:").bold(),
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

/// Poll the spreadsheet and print events until Ctrl-C
pub async fn watch(config_path: &str, interval: Option<u64>) -> Result<()> {
    let settings = load_settings(config_path)?;
    let engine = build_engine(&settings)?;

    if let Some(ms) = interval {
        engine
            .update_config(SyncConfigUpdate::default().poll_interval_ms(ms))
            .context("Invalid poll interval")?;
    }

    let _subscriptions: Vec<Subscription> = ALL_EVENTS
        .iter()
        .map(|kind| engine.subscribe(*kind, |event| println!("{}", describe_event(event))))
        .collect();

    engine
        .initialize(settings.credentials.clone(), settings.source.clone())
        .await
        .context("Initial sync failed")?;
    engine.start_sync().context("Failed to start polling")?;

    println!("Watching {} (Ctrl-C to stop)", settings.source.source_key());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    engine.shutdown();
    let status = engine.get_status();
    log::info!(
        "Stopped after {} history entries, last error: {}",
        engine.get_sync_history(usize::MAX).len(),
        status.last_error.as_deref().unwrap_or("none")
    );
    Ok(())
}

fn build_engine(settings: &EngineSettings) -> Result<SyncOrchestrator<SheetsSource>> {
    let source = SheetsSource::new().context("Failed to create HTTP client")?;
    SyncOrchestrator::new(source, settings.sync.clone()).context("Invalid sync settings")
}

fn load_settings(config_path: &str) -> Result<EngineSettings> {
    let settings = EngineSettings::load(config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path))?;

    if let Err(errors) = settings.validate() {
        bail!("Invalid settings:\n{}", format_errors(&errors));
    }
    Ok(settings)
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_settings(settings: &EngineSettings) -> String {
    let sync = &settings.sync;
    let mut lines = vec![
        format!("source.spreadsheet_id   {}", settings.source.spreadsheet_id),
        format!("source.range            {}", settings.source.range),
        format!("sync.poll_interval_ms   {}", sync.poll_interval_ms),
        format!("sync.max_retries        {}", sync.max_retries),
        format!("sync.backoff_multiplier {}", sync.backoff_multiplier),
        format!("sync.conflict_strategy  {}", sync.conflict_strategy),
        format!("sync.fetch_timeout_ms   {}", sync.fetch_timeout_ms),
    ];
    for (header, field) in &settings.source.column_map {
        lines.push(format!("source.column_map        {} -> {}", header, field));
    }
    let credential = match (&settings.credentials.api_key, &settings.credentials.access_token) {
        (Some(_), Some(_)) => "api key + access token",
        (Some(_), None) => "api key",
        (None, Some(_)) => "access token",
        (None, None) => "none",
    };
    lines.push(format!("credentials             {}", credential));
    lines.join("\n")
}

/// One-line description of an event for the watch output
fn describe_event(event: &SyncEvent) -> String {
    let time = event.timestamp().format("%H:%M:%S");
    match event {
        SyncEvent::InitialSync { source_id, rows, .. } => {
            format!("[{}] initial_sync {} rows from {}", time, rows.len(), source_id)
        }
        SyncEvent::DataChanged {
            changes, conflicts, ..
        } => format!(
            "[{}] data_changed +{} ~{} -{} ({} conflicts)",
            time,
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len(),
            conflicts.len()
        ),
        SyncEvent::SyncStarted {
            poll_interval_ms, ..
        } => format!("[{}] sync_started every {} ms", time, poll_interval_ms),
        SyncEvent::SyncStopped { .. } => format!("[{}] sync_stopped", time),
        SyncEvent::SyncError {
            error,
            error_count,
            retry_in_ms,
            ..
        } => match retry_in_ms {
            Some(ms) => format!(
                "[{}] sync_error #{}: {} (retry in {} ms)",
                time, error_count, error, ms
            ),
            None => format!("[{}] sync_error #{}: {}", time, error_count, error),
        },
        SyncEvent::SyncFailed {
            error, attempts, ..
        } => format!("[{}] sync_failed after {} attempt(s): {}", time, attempts, error),
    }
}
