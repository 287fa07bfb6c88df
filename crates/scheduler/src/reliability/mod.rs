//! Reliability patterns for the dispatch loop
//!
//! This module provides:
//! - [`RetryPolicy`] - Bounded retry with fixed, linear or exponential backoff
//! - [`FailureWindow`] - Ring buffer of recent task outcomes
//! - [`CircuitBreaker`] - Pauses dispatch when the failure rate breaches a threshold

mod circuit_breaker;
mod failure_window;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use failure_window::FailureWindow;
pub use retry::{Backoff, RetryPolicy, Retryable};
