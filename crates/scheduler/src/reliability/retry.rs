//! Retry policy implementation

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use gridrank_core::AcquisitionError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::duration_millis;

/// Classifies an error as worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AcquisitionError {
    fn is_retryable(&self) -> bool {
        AcquisitionError::is_retryable(self)
    }
}

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// `initial_interval * n` before the n-th retry
    Linear,
    /// `initial_interval * coefficient^(n-1)` before the n-th retry
    Exponential { coefficient: f64 },
}

/// Bounded retry configuration
///
/// Independent of what it wraps: the acquisition call and the store writes
/// use the same type with different parameters.
///
/// # Example
///
/// ```
/// use gridrank_scheduler::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::acquisition();
///
/// // Attempt 1 runs immediately
/// // Attempt 2 after 2 seconds
/// // Attempt 3 after 4 seconds
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff: Backoff,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means +/-10% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::acquisition()
    }
}

impl RetryPolicy {
    /// Exponential backoff with the given attempt budget and base delay
    pub fn exponential(max_attempts: u32, initial_interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval,
            max_interval: Duration::from_secs(60),
            backoff: Backoff::Exponential { coefficient: 2.0 },
            jitter: 0.0,
        }
    }

    /// Policy for a single rank acquisition: 3 attempts, 2s then 4s between them
    pub fn acquisition() -> Self {
        Self::exponential(3, Duration::from_secs(2))
    }

    /// Policy for store calls: 3 attempts, 1s then 2s between them
    pub fn persistence() -> Self {
        Self::linear(Duration::from_secs(1), 3)
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff: Backoff::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff: Backoff::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy whose delay grows by `interval` per retry
    pub fn linear(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: Duration::from_secs(60),
            backoff: Backoff::Linear,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before that attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1; // First retry is after attempt 1
        let initial = self.initial_interval.as_secs_f64();
        let base = match self.backoff {
            Backoff::Fixed => initial,
            Backoff::Linear => initial * f64::from(retry_num),
            Backoff::Exponential { coefficient } => {
                initial * coefficient.powi(retry_num as i32 - 1)
            }
        };
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter_range = capped * self.jitter;
        let jittered = if jitter_range > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts.max(1)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. Returns the last error on failure.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() || !self.has_attempts_remaining(attempt) {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt + 1);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
