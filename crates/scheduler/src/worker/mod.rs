//! Execution units and the pool manager that feeds them
//!
//! This module provides:
//! - [`WorkerPool`] - Dispatches the points of one run to a fixed set of units
//! - [`WorkerPoolConfig`] - Concurrency, pacing, retry and pause settings
//! - The messages units and the manager exchange
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                           │
//! │  point queue (FIFO) · CircuitBreaker · buffered idle units  │
//! └──────┬───────────────────────▲──────────────────────────────┘
//!        │ WorkerCommand         │ TaskResult
//!        │ (capacity 1 per unit) │ (shared results channel)
//!        ▼                       │
//! ┌─────────────┐  ┌─────────────┐       ┌─────────────┐
//! │  worker-0   │  │  worker-1   │  ...  │  worker-N   │
//! │ RetryPolicy │  │ RetryPolicy │       │ RetryPolicy │
//! └──────┬──────┘  └──────┬──────┘       └──────┬──────┘
//!        └────────────────┴─────────┬───────────┘
//!                                   ▼
//!                            RankAcquisition
//! ```

mod message;
mod pool;
mod unit;

pub use message::{
    RunContext, Task, TaskOutcome, TaskResult, WorkerCommand, WorkerId, WorkerState,
};
pub use pool::{PoolReport, WorkerPool, WorkerPoolConfig, WorkerPoolError};
