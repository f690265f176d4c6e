// crates/remote-source/src/error.rs
//! Error types for remote source operations

use thiserror::Error;

/// Result type for remote source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by a remote tabular source
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Credentials missing, rejected, or expired
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transient network or API failure
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Source answered with a body that could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Source configuration is unusable
    #[error("Invalid source configuration: {0}")]
    Configuration(String),
}

impl SourceError {
    /// Returns true if retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Fetch(_) | SourceError::InvalidResponse(_))
    }

    /// Returns true for credential failures
    pub fn is_authentication(&self) -> bool {
        matches!(self, SourceError::Authentication(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::InvalidResponse(err.to_string())
        } else {
            SourceError::Fetch(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::Authentication("token expired".to_string());
        assert!(err.to_string().contains("Authentication failed"));
        assert!(err.to_string().contains("token expired"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SourceError::Fetch("503".to_string()).is_retryable());
        assert!(SourceError::InvalidResponse("eof".to_string()).is_retryable());
        assert!(!SourceError::Authentication("401".to_string()).is_retryable());
        assert!(!SourceError::Configuration("no id".to_string()).is_retryable());
    }

    #[test]
    fn test_is_authentication() {
        assert!(SourceError::Authentication("401".to_string()).is_authentication());
        assert!(!SourceError::Fetch("reset".to_string()).is_authentication());
    }
}
