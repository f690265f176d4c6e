// crates/resilience/src/backoff.rs
//! Exponential backoff between poll retries

use crate::error::{ResilienceError, ResilienceResult};
use std::time::Duration;

/// Backoff schedule for consecutive failures
///
/// The delay before retry `k` is `base_interval × multiplier^(k−1)`. There
/// is no jitter: the schedule is a pure function of the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry, normally the poll interval
    base_interval: Duration,
    /// Growth factor per consecutive failure
    multiplier: f64,
    /// Consecutive failures tolerated before giving up
    max_retries: u32,
    /// Optional ceiling on a single delay
    max_delay: Option<Duration>,
}

impl BackoffPolicy {
    /// Creates a policy with a multiplier of 2 and no ceiling
    pub fn new(base_interval: Duration, max_retries: u32) -> Self {
        Self {
            base_interval,
            multiplier: 2.0,
            max_retries,
            max_delay: None,
        }
    }

    /// Sets the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Caps every delay at `delay`
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Checks the policy can produce a non-decreasing schedule
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.base_interval.is_zero() {
            return Err(ResilienceError::InvalidPolicy(
                "base interval must be greater than zero".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ResilienceError::InvalidPolicy(format!(
                "multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_retries == 0 {
            return Err(ResilienceError::InvalidPolicy(
                "max retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let millis = self.base_interval.as_millis() as f64 * self.multiplier.powi(exponent);

        // `as u64` saturates, so an overflowing schedule pins at u64::MAX ms
        let delay = Duration::from_millis(millis.round() as u64);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Returns true once `consecutive_errors` reaches the retry budget
    pub fn is_exhausted(&self, consecutive_errors: u32) -> bool {
        consecutive_errors >= self.max_retries
    }

    /// Retries left after `consecutive_errors` failures
    pub fn remaining(&self, consecutive_errors: u32) -> u32 {
        self.max_retries.saturating_sub(consecutive_errors)
    }

    /// Returns the base interval
    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    /// Returns the multiplier
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the retry budget
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3)
    }
}
