// crates/sync-engine/src/error.rs
//! Error types for sync operations

use crate::engine::EngineState;
use sheetsync_resilience::ResilienceError;
use sheetsync_source::SourceError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// Credentials missing or rejected; never retried automatically
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transient fetch failure; retried with backoff
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Engine or source configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resolved data failed schema checks
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A subscriber callback panicked
    #[error("Subscriber for '{event}' failed: {message}")]
    Subscriber { event: String, message: String },

    /// `initialize` has not completed
    #[error("Sync engine not initialized")]
    NotInitialized,

    /// Operation needs a running engine
    #[error("Sync is not running (state: {0})")]
    NotRunning(EngineState),

    /// Another cycle holds the cycle guard
    #[error("A sync cycle is already in progress")]
    CycleInProgress,

    /// No async runtime to host the poll loop
    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    /// Failed to read a settings file
    #[error("Failed to read settings at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a settings file
    #[error("Failed to parse settings: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SyncError {
    /// Returns true if the poll loop should retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Fetch(_))
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Authentication(msg) => SyncError::Authentication(msg),
            SourceError::Configuration(msg) => SyncError::Configuration(msg),
            other => SyncError::Fetch(other.to_string()),
        }
    }
}

impl From<ResilienceError> for SyncError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::InvalidPolicy(msg) => SyncError::Configuration(msg),
            other => SyncError::Fetch(other.to_string()),
        }
    }
}
