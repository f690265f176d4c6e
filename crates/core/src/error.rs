// crates/core/src/error.rs
//! Error types for the row model

use thiserror::Error;

/// Result type for row model operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building or interpreting rows
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Value could not be interpreted as a row
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// Value could not be parsed as a date
    #[error("Invalid date: '{0}'")]
    InvalidDate(String),
}
