//! Worker pool manager for one run
//!
//! A single coordinator owns the point queue, the circuit breaker and the
//! unit handles. Units only talk to it through channels, so none of that
//! state needs a lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gridrank_core::{EgressConfig, Point, RankAcquisition, Run, NOT_FOUND_RANK};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::message::{
    RunContext, Task, TaskOutcome, TaskResult, WorkerCommand, WorkerId, WorkerState,
};
use super::unit::{spawn_unit, WorkerHandle};
use crate::duration_millis;
use crate::persistence::RunStore;
use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent execution units
    pub max_concurrency: usize,

    /// Delay before a unit that just reported gets its next task
    #[serde(with = "duration_millis")]
    pub inter_dispatch_delay: Duration,

    /// How long each unit gets to exit before it is aborted
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,

    /// Retry policy around one rank acquisition
    pub acquisition_retry: RetryPolicy,

    /// Retry policy around store writes
    pub persistence_retry: RetryPolicy,

    /// Failure-rate pause configuration
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            inter_dispatch_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
            acquisition_retry: RetryPolicy::acquisition(),
            persistence_retry: RetryPolicy::persistence(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the pause before a freed unit gets its next point
    pub fn with_inter_dispatch_delay(mut self, delay: Duration) -> Self {
        self.inter_dispatch_delay = delay;
        self
    }

    /// Set the per-unit shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the retry policy wrapped around each acquisition
    pub fn with_acquisition_retry(mut self, policy: RetryPolicy) -> Self {
        self.acquisition_retry = policy;
        self
    }

    /// Set the retry policy for store reads and writes
    pub fn with_persistence_retry(mut self, policy: RetryPolicy) -> Self {
        self.persistence_retry = policy;
        self
    }

    /// Set the failure window and pause settings
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Every unit went away before all points reported
    #[error("execution units lost after {completed} of {total} results")]
    WorkersLost { completed: usize, total: usize },

    /// `run_to_completion` was called on a pool that already ran
    #[error("worker pool has already been started")]
    AlreadyStarted,
}

/// Counters for one pool run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub total_points: usize,
    /// Tasks handed to a unit
    pub dispatched: usize,
    /// Points persisted with a located rank
    pub ranked: usize,
    /// Points persisted with the not-found sentinel
    pub unranked: usize,
    /// Tasks that came back as errors; their points stay unmeasured
    pub errored: usize,
    /// Successful acquisitions whose rank could not be written
    pub persist_failures: usize,
    pub pauses: u32,
    pub peak_in_flight: usize,
}

/// Drives the points of one run through a fixed set of execution units
///
/// # Example
///
/// ```ignore
/// use gridrank_scheduler::{WorkerPool, WorkerPoolConfig};
///
/// let mut pool = WorkerPool::new(&run, points, store, client, egress, WorkerPoolConfig::default());
/// let report = pool.run_to_completion().await?;
/// // ... persist run status
/// pool.shutdown().await;
/// ```
pub struct WorkerPool {
    run_id: Uuid,
    context: Arc<RunContext>,
    store: Arc<dyn RunStore>,
    client: Arc<dyn RankAcquisition>,
    config: WorkerPoolConfig,
    size: usize,
    queue: VecDeque<Point>,
    total: usize,
    workers: Vec<WorkerHandle>,
    breaker: CircuitBreaker,
    /// Idle units held back while paused
    buffered: Vec<WorkerId>,
    /// Units waiting out the inter-dispatch delay, deadlines ascending
    deferred: VecDeque<(WorkerId, Instant)>,
    completed: usize,
    in_flight: usize,
    started: bool,
    report: PoolReport,
}

impl WorkerPool {
    /// Create a pool for `points` of `run`, sized to
    /// `min(max_concurrency, points.len())`. Units are spawned when the pool runs.
    pub fn new(
        run: &Run,
        points: Vec<Point>,
        store: Arc<dyn RunStore>,
        client: Arc<dyn RankAcquisition>,
        egress: EgressConfig,
        config: WorkerPoolConfig,
    ) -> Self {
        let total = points.len();
        let size = config.max_concurrency.max(1).min(total);
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());

        Self {
            run_id: run.id,
            context: Arc::new(RunContext::from_run(run, egress)),
            store,
            client,
            size,
            queue: points.into(),
            total,
            workers: Vec::with_capacity(size),
            breaker,
            buffered: Vec::new(),
            deferred: VecDeque::new(),
            completed: 0,
            in_flight: 0,
            started: false,
            report: PoolReport {
                total_points: total,
                ..Default::default()
            },
            config,
        }
    }

    /// Number of execution units this pool runs
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks assigned to a unit with no result yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Counters so far
    pub fn report(&self) -> &PoolReport {
        &self.report
    }

    /// State of each unit, indexed by worker id
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| w.state).collect()
    }

    /// Dispatch every point and wait until each has reported exactly once.
    ///
    /// Units are left running; call [`shutdown`](Self::shutdown) once the
    /// run status has been written.
    #[instrument(skip(self), fields(run_id = %self.run_id, points = self.total, units = self.size))]
    pub async fn run_to_completion(&mut self) -> Result<PoolReport, WorkerPoolError> {
        if self.started {
            return Err(WorkerPoolError::AlreadyStarted);
        }
        self.started = true;

        if self.total == 0 {
            return Ok(self.report.clone());
        }

        let (results_tx, mut results_rx) = mpsc::channel(self.size);
        for index in 0..self.size {
            let handle = spawn_unit(
                WorkerId(index),
                Arc::clone(&self.client),
                self.config.acquisition_retry.clone(),
                results_tx.clone(),
            );
            self.workers.push(handle);
        }
        // Only units hold senders from here on
        drop(results_tx);

        info!(units = self.size, "Dispatching points");
        for index in 0..self.size {
            self.dispatch_next(WorkerId(index));
        }

        while self.completed < self.total {
            let resume_at = self.breaker.resume_at();
            let next_deferred = self.deferred.front().map(|(_, at)| *at);

            // Record outcomes before any timer so a breach stops the next dispatch
            tokio::select! {
                biased;

                received = results_rx.recv() => match received {
                    Some(result) => self.on_result(result).await,
                    None => {
                        error!(
                            completed = self.completed,
                            total = self.total,
                            "All execution units exited before the run finished"
                        );
                        return Err(WorkerPoolError::WorkersLost {
                            completed: self.completed,
                            total: self.total,
                        });
                    }
                },
                _ = sleep_until(resume_at.unwrap_or_else(Instant::now)), if resume_at.is_some() => {
                    self.resume();
                }
                _ = sleep_until(next_deferred.unwrap_or_else(Instant::now)), if next_deferred.is_some() => {
                    if let Some((id, _)) = self.deferred.pop_front() {
                        self.dispatch_next(id);
                    }
                }
            }
        }

        self.report.pauses = self.breaker.pauses();
        info!(
            ranked = self.report.ranked,
            unranked = self.report.unranked,
            errored = self.report.errored,
            pauses = self.report.pauses,
            "All points reported"
        );
        Ok(self.report.clone())
    }

    /// Give `id` the next point, buffer it while paused, or tell it to exit
    /// when the queue is empty.
    fn dispatch_next(&mut self, id: WorkerId) {
        if !self.breaker.is_dispatch_allowed() {
            debug!(worker_id = %id, "Dispatch paused, buffering idle unit");
            self.set_state(id, WorkerState::Idle);
            self.buffered.push(id);
            return;
        }

        let Some(point) = self.queue.pop_front() else {
            debug!(worker_id = %id, "Queue drained, releasing unit");
            self.send_exit(id);
            return;
        };

        let point_id = point.id;
        let task = Task {
            point,
            context: Arc::clone(&self.context),
        };

        let Some(worker) = self.workers.get_mut(id.0) else {
            self.queue.push_front(task.point);
            return;
        };

        match worker.send(WorkerCommand::Execute(task)) {
            Ok(()) => {
                worker.state = WorkerState::Busy;
                self.in_flight += 1;
                self.report.dispatched += 1;
                self.report.peak_in_flight = self.report.peak_in_flight.max(self.in_flight);
                debug!(worker_id = %id, %point_id, in_flight = self.in_flight, "Task dispatched");
            }
            Err(command) => {
                warn!(worker_id = %id, %point_id, "Execution unit unavailable, requeueing point");
                worker.state = WorkerState::Exited;
                if let WorkerCommand::Execute(task) = command {
                    self.queue.push_front(task.point);
                }
            }
        }
    }

    async fn on_result(&mut self, result: TaskResult) {
        let id = result.worker_id;
        self.in_flight = self.in_flight.saturating_sub(1);
        self.set_state(id, WorkerState::Idle);

        let failed = match result.outcome {
            TaskOutcome::Success => self.persist_rank(&result).await,
            TaskOutcome::Error => {
                warn!(
                    worker_id = %id,
                    point_id = %result.point_id,
                    reason = %result.reason,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Task failed, point left unmeasured"
                );
                self.report.errored += 1;
                true
            }
        };

        if let Some(resume_at) = self.breaker.record(failed, Instant::now()) {
            warn!(
                failure_rate = self.breaker.failure_rate(),
                window = self.breaker.window().len(),
                pause_secs = self.config.circuit_breaker.pause_duration.as_secs(),
                "Failure rate threshold reached, pausing dispatch"
            );
            debug!(?resume_at, "Resume scheduled");
        }

        self.completed += 1;
        if self.completed == self.total {
            return;
        }

        let at = Instant::now() + self.config.inter_dispatch_delay;
        self.deferred.push_back((id, at));
    }

    /// Write the rank for a successful result. Returns whether the outcome
    /// counts as a failure.
    async fn persist_rank(&mut self, result: &TaskResult) -> bool {
        let rank = result.rank.unwrap_or(NOT_FOUND_RANK);
        let point_id = result.point_id;
        let measured_at = Utc::now();
        let store = Arc::clone(&self.store);

        let written = self
            .config
            .persistence_retry
            .retry(|_| store.set_point_rank(point_id, rank, measured_at))
            .await;

        match written {
            Ok(()) => {
                if result.rank.is_some() {
                    self.report.ranked += 1;
                } else {
                    self.report.unranked += 1;
                }
                debug!(%point_id, rank, reason = %result.reason, "Point ranked");
                result.reason.counts_as_failure()
            }
            Err(e) => {
                error!(%point_id, rank, error = %e, "Failed to persist rank");
                self.report.persist_failures += 1;
                true
            }
        }
    }

    /// Pause elapsed: reset the window and flush buffered units in one pass.
    fn resume(&mut self) {
        if !self.breaker.begin_resume() {
            return;
        }
        self.breaker.finish_resume();

        let buffered = std::mem::take(&mut self.buffered);
        info!(units = buffered.len(), "Resuming dispatch");
        for id in buffered {
            self.dispatch_next(id);
        }
    }

    fn send_exit(&mut self, id: WorkerId) {
        if let Some(worker) = self.workers.get_mut(id.0) {
            worker.state = match worker.send(WorkerCommand::Exit) {
                Ok(()) => WorkerState::Exiting,
                Err(_) => WorkerState::Exited,
            };
        }
    }

    fn set_state(&mut self, id: WorkerId, state: WorkerState) {
        if let Some(worker) = self.workers.get_mut(id.0) {
            worker.state = state;
        }
    }

    /// Tell every unit to exit and wait up to the grace period for each,
    /// aborting the ones that do not stop. Returns the number aborted.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn shutdown(&mut self) -> usize {
        let grace = self.config.shutdown_grace;
        let mut aborted = 0;

        for worker in &mut self.workers {
            if matches!(worker.state, WorkerState::Exited) {
                continue;
            }
            if !matches!(worker.state, WorkerState::Exiting) {
                // A closed inbox means the unit has already stopped
                let _ = worker.send(WorkerCommand::Exit);
                worker.state = WorkerState::Exiting;
            }
        }

        for worker in &mut self.workers {
            if worker.join.is_finished() {
                worker.state = WorkerState::Exited;
                continue;
            }
            if timeout(grace, &mut worker.join).await.is_err() {
                warn!(worker_id = %worker.id, grace_secs = grace.as_secs(), "Unit did not exit in time, aborting");
                worker.join.abort();
                aborted += 1;
            }
            worker.state = WorkerState::Exited;
        }

        debug!(aborted, "Execution units stopped");
        aborted
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.join.abort();
        }
    }
}
