// crates/remote-source/src/memory.rs
//! In-process source for embedding hosts and tests

use crate::config::{Credentials, SourceConfig};
use crate::error::{SourceError, SourceResult};
use crate::range::FetchedRange;
use crate::traits::RemoteSource;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    range: FetchedRange,
    accepted_key: Option<String>,
    queued_failures: VecDeque<SourceError>,
    persistent_failure: Option<SourceError>,
    latency: Option<Duration>,
    fetch_count: usize,
}

/// Source whose grid is held in memory and replaced by the host
///
/// Clones share state, so a host can keep one handle to edit the grid or
/// inject failures while the engine owns another.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    /// Creates a source serving `range`
    pub fn new(range: FetchedRange) -> Self {
        let source = Self::default();
        source.set_range(range);
        source
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the served grid
    pub fn set_range(&self, range: FetchedRange) {
        self.state().range = range;
    }

    /// Only accept credentials carrying this API key
    pub fn require_api_key(&self, key: impl Into<String>) {
        self.state().accepted_key = Some(key.into());
    }

    /// Fails the next fetch with `error`; queued failures are consumed in order
    pub fn push_failure(&self, error: SourceError) {
        self.state().queued_failures.push_back(error);
    }

    /// Fails every fetch with `error` until cleared
    pub fn fail_always(&self, error: SourceError) {
        self.state().persistent_failure = Some(error);
    }

    /// Clears queued and persistent failures
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.queued_failures.clear();
        state.persistent_failure = None;
    }

    /// Delays every fetch by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Number of fetches attempted so far
    pub fn fetch_count(&self) -> usize {
        self.state().fetch_count
    }
}

impl RemoteSource for MemorySource {
    async fn authenticate(&self, credentials: &Credentials) -> SourceResult<()> {
        if credentials.is_empty() {
            return Err(SourceError::Authentication(
                "an api key or access token is required".to_string(),
            ));
        }

        let accepted = self.state().accepted_key.clone();
        match accepted {
            Some(expected) if credentials.api_key.as_deref() != Some(expected.as_str()) => Err(
                SourceError::Authentication("api key rejected".to_string()),
            ),
            _ => Ok(()),
        }
    }

    async fn fetch_rows(&self, config: &SourceConfig) -> SourceResult<FetchedRange> {
        if !config.is_configured() {
            return Err(SourceError::Configuration(
                "spreadsheet id is required".to_string(),
            ));
        }

        let latency = {
            let mut state = self.state();
            state.fetch_count += 1;
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if let Some(error) = state.queued_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.persistent_failure.clone() {
            return Err(error);
        }
        Ok(state.range.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
