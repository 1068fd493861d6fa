// recstream-core/src/storage/retry.rs

//! Retry policy for remote operations.
//!
//! Remote connections may drop mid-operation. Operations wrapped in
//! [`retry_blocking`] are re-run on a fresh attempt after a short, growing
//! delay, but only for errors that report themselves as retryable.

use std::time::Duration;

use crate::config::RemoteCacheConfig;
use crate::error::Result;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RemoteCacheConfig> for RetryConfig {
    fn from(remote: &RemoteCacheConfig) -> Self {
        Self {
            max_retries: remote.max_reconnects,
            initial_delay: Duration::from_millis(remote.reconnect_delay_ms),
            ..Default::default()
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculates the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);

        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }

    /// Returns true if more retries are allowed for the given attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error,
/// or the retry budget is spent.
///
/// The closure receives the attempt number, starting at 0.
pub fn retry_blocking<T, F>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut attempt = 0;

    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && config.should_retry(attempt) => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying remote operation"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
