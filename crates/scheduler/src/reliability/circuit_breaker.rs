//! Failure-rate circuit breaker for the dispatch loop

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::failure_window::FailureWindow;
use crate::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - dispatch allowed
    Closed,

    /// Failure rate breached - idle workers are buffered, nothing dispatched
    Paused,

    /// Pause timer fired - window is being reset and buffered workers flushed
    Resuming,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Paused => write!(f, "paused"),
            Self::Resuming => write!(f, "resuming"),
        }
    }
}

/// Circuit breaker configuration
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  rate >= threshold  ┌─────────┐  pause elapsed  ┌──────────┐
/// │ Closed  │ ──────────────────► │ Paused  │ ──────────────► │ Resuming │
/// └─────────┘                     └─────────┘                 └──────────┘
///      ▲                                                            │
///      │              window cleared, buffered workers flushed      │
///      └────────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use gridrank_scheduler::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_window_size(20)
///     .with_pause_duration(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of most recent outcomes considered
    pub window_size: usize,

    /// Failure ratio (0.0-1.0) at or above which dispatch pauses
    pub failure_rate_threshold: f64,

    /// Outcomes required in the window before the rate is evaluated
    pub min_samples: usize,

    /// How long dispatch stays paused after a breach
    #[serde(with = "duration_millis")]
    pub pause_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            min_samples: 10,
            pause_duration: Duration::from_secs(5 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window size; `min_samples` follows it
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(1);
        self.min_samples = self.window_size;
        self
    }

    /// Set the failure ratio that trips the breaker
    pub fn with_failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Evaluate the rate once this many outcomes are recorded (capped at the window size)
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples.clamp(1, self.window_size.max(1));
        self
    }

    /// Set how long dispatch is paused after a breach
    pub fn with_pause_duration(mut self, duration: Duration) -> Self {
        self.pause_duration = duration;
        self
    }
}

/// Tracks outcomes for one pool and decides whether dispatch may proceed.
///
/// Owned by a single coordinator; no interior locking.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    window: FailureWindow,
    state: CircuitState,
    resume_at: Option<Instant>,
    pauses: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            window: FailureWindow::new(config.window_size),
            config,
            state: CircuitState::Closed,
            resume_at: None,
            pauses: 0,
        }
    }

    /// Record an outcome. Returns the resume deadline when this outcome
    /// trips the breaker; breaches while already paused return `None`.
    pub fn record(&mut self, failed: bool, now: Instant) -> Option<Instant> {
        self.window.push(failed);

        if self.state != CircuitState::Closed {
            return None;
        }

        if self.window.len() >= self.config.min_samples
            && self.window.failure_rate() >= self.config.failure_rate_threshold
        {
            let resume_at = now + self.config.pause_duration;
            self.state = CircuitState::Paused;
            self.resume_at = Some(resume_at);
            self.pauses += 1;
            return Some(resume_at);
        }

        None
    }

    pub fn is_dispatch_allowed(&self) -> bool {
        self.state == CircuitState::Closed
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Deadline of the pause in flight, if any
    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    /// Move from `Paused` to `Resuming`. Returns false in any other state.
    pub fn begin_resume(&mut self) -> bool {
        if self.state != CircuitState::Paused {
            return false;
        }
        self.state = CircuitState::Resuming;
        self.resume_at = None;
        true
    }

    /// Clear the window and close the breaker.
    pub fn finish_resume(&mut self) {
        self.window.clear();
        self.state = CircuitState::Closed;
        self.resume_at = None;
    }

    pub fn failure_rate(&self) -> f64 {
        self.window.failure_rate()
    }

    pub fn window(&self) -> &FailureWindow {
        &self.window
    }

    /// Number of pauses entered so far
    pub fn pauses(&self) -> u32 {
        self.pauses
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
