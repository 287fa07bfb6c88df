//! # Geo-Grid Rank Scheduler
//!
//! Dispatches one rank measurement per grid point to a bounded pool of
//! execution units and keeps run state consistent under partial failure.
//!
//! ## Features
//!
//! - **Bounded concurrency**: a fixed set of units per run, one task each
//! - **Per-task retries**: exponential backoff around each acquisition
//! - **Failure-rate pause**: dispatch stops for a while when most recent tasks fail
//! - **Single-host exclusion**: a pid-file lock keeps dispatchers from overlapping
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RunDispatcher                          │
//! │  (holds the lock, walks pending runs oldest first)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ one run at a time
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                            │
//! │  (point queue, circuit breaker, execution units)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RunStore                             │
//! │  (PostgreSQL: geogrid_runs, geogrid_points)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use gridrank_scheduler::prelude::*;
//!
//! let store = Arc::new(PostgresRunStore::new(pool));
//! let client = Arc::new(HttpRankClient::new(HttpRankClientConfig::default())?);
//! let dispatcher = RunDispatcher::new(store, client, DispatcherConfig::default());
//!
//! if let DispatchOutcome::Finished(summary) = dispatcher.run().await? {
//!     println!("{} runs done", summary.done());
//! }
//! ```

pub mod dispatcher;
mod duration_millis;
pub mod lock;
pub mod persistence;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::dispatcher::{
        DispatchError, DispatchOutcome, DispatchSummary, DispatcherConfig, RunDispatcher,
        RunResult, RunSummary,
    };
    pub use crate::lock::{LockError, LockGuard, LockManager};
    pub use crate::persistence::{InMemoryRunStore, PostgresRunStore, RunStore, StoreError};
    pub use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
    pub use crate::worker::{PoolReport, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

// Re-export key types at crate root
pub use dispatcher::{
    DispatchError, DispatchOutcome, DispatchSummary, DispatcherConfig, RunDispatcher, RunResult,
    RunSummary,
};
pub use lock::{LockError, LockGuard, LockInfo, LockManager};
pub use persistence::{InMemoryRunStore, PostgresRunStore, RunStore, StoreError, StoreOperation};
pub use reliability::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureWindow, RetryPolicy,
    Retryable,
};
pub use worker::{
    PoolReport, TaskOutcome, TaskResult, WorkerId, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerState,
};
