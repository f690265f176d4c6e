// crates/resilience/src/lib.rs
//! Resilience patterns for the sync poll loop
//!
//! - Exponential backoff between retries after consecutive failures
//! - Retry budget accounting
//! - Timeouts around remote fetches
//!
//! # Example
//!
//! ```rust
//! use sheetsync_resilience::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(Duration::from_secs(30), 3).with_multiplier(2.0);
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(60));
//! assert!(policy.is_exhausted(3));
//! ```

mod backoff;
mod error;
mod timeout;

pub use backoff::BackoffPolicy;
pub use error::{ResilienceError, ResilienceResult};
pub use timeout::with_timeout;
