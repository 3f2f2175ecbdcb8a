//! Retry policy for object store copies.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::SwiftSettings;
use crate::error::LibrarianError;
use rand::Rng;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before giving up on an object.
    pub max_retries: u32,
    /// Initial backoff duration in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &SwiftSettings) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_secs: config.initial_backoff_secs,
            max_backoff_secs: config.max_backoff_secs,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Check if an error should be retried given the current retry count.
    pub fn should_retry(&self, error: &LibrarianError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Backoff in seconds: `initial_backoff * multiplier^retry_count`,
    /// capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, retry_count: u32) -> u64 {
        let backoff =
            self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(retry_count as i32);
        (backoff.min(self.max_backoff_secs as f64)) as u64
    }

    /// Backoff plus up to 10% random jitter.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let base = Duration::from_secs(self.backoff_secs(retry_count));
        let jitter_ms = base.as_millis() as u64 / 10;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
            backoff_multiplier: 2.0,
        }
    }
}
