// crates/resilience/src/timeout.rs
//! Timeout handling for async operations

use crate::error::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::time::Duration;

/// Runs `operation`, failing with [`ResilienceError::Timeout`] if it does
/// not finish within `duration`
pub async fn with_timeout<F>(duration: Duration, operation: F) -> ResilienceResult<F::Output>
where
    F: Future,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| ResilienceError::Timeout(duration))
}
