// crates/resilience/src/error.rs
//! Error types for resilience operations

use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in resilience operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Consecutive failures reached the retry budget
    #[error("All {attempts} retry attempts exhausted: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Backoff parameters are unusable
    #[error("Invalid backoff policy: {0}")]
    InvalidPolicy(String),
}
