//! Run dispatcher: drains pending runs one at a time under the host lock

use std::path::PathBuf;
use std::sync::Arc;

use gridrank_core::{EgressConfig, Point, RankAcquisition, Run, RunStatus};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::lock::{LockError, LockManager};
use crate::persistence::{RunStore, StoreError};
use crate::worker::{PoolReport, WorkerPool, WorkerPoolConfig};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Marker file guarding against concurrent dispatchers on this host
    pub lock_path: PathBuf,

    /// Settings for each run's pool
    pub pool: WorkerPoolConfig,

    /// Egress identity handed to every acquisition
    pub egress: EgressConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lock_path: std::env::temp_dir().join("gridrank-dispatcher.pid"),
            pool: WorkerPoolConfig::default(),
            egress: EgressConfig::direct(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_egress(mut self, egress: EgressConfig) -> Self {
        self.egress = egress;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The lock marker could not be created or removed
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Pending runs could not be loaded
    #[error("failed to load pending runs: {0}")]
    Store(#[from] StoreError),
}

/// What happened to one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunResult {
    /// Every point ranked and the run marked done
    Done,
    /// Points still unranked; the run stays `running` for the next invocation
    Incomplete { remaining: usize },
    /// A status or point read could not be completed; the run was left as is
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub keyword: String,
    pub result: RunResult,
    /// Pool counters, absent when no pool was started
    pub report: Option<PoolReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub runs: Vec<RunSummary>,
}

impl DispatchSummary {
    pub fn done(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.result == RunResult::Done)
            .count()
    }
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Another dispatcher holds the lock; nothing was read or dispatched
    AlreadyRunning,
    Finished(DispatchSummary),
}

/// Top-level loop over pending runs
///
/// # Example
///
/// ```ignore
/// use gridrank_scheduler::{DispatcherConfig, RunDispatcher};
///
/// let dispatcher = RunDispatcher::new(store, client, DispatcherConfig::default());
/// match dispatcher.run().await? {
///     DispatchOutcome::AlreadyRunning => {}
///     DispatchOutcome::Finished(summary) => println!("{} runs done", summary.done()),
/// }
/// ```
pub struct RunDispatcher {
    store: Arc<dyn RunStore>,
    client: Arc<dyn RankAcquisition>,
    config: DispatcherConfig,
}

impl RunDispatcher {
    pub fn new(
        store: Arc<dyn RunStore>,
        client: Arc<dyn RankAcquisition>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Take the lock, process every pending run sequentially, release the lock.
    #[instrument(skip(self), fields(lock = %self.config.lock_path.display()))]
    pub async fn run(&self) -> Result<DispatchOutcome, DispatchError> {
        let guard = match LockManager::new(&self.config.lock_path).acquire() {
            Ok(guard) => guard,
            Err(LockError::AlreadyHeld { holder, .. }) => {
                info!(
                    holder_pid = holder.map(|h| h.pid),
                    "Another dispatcher is running, exiting"
                );
                return Ok(DispatchOutcome::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        };

        // The guard also removes the marker if this future is dropped
        let result = self.process_pending().await;

        if let Err(e) = guard.release() {
            warn!(error = %e, "Failed to release dispatcher lock");
        }

        result.map(DispatchOutcome::Finished)
    }

    async fn process_pending(&self) -> Result<DispatchSummary, DispatchError> {
        let runs = self
            .config
            .pool
            .persistence_retry
            .retry(|_| self.store.list_pending_runs())
            .await?;

        info!(runs = runs.len(), "Loaded pending runs");

        let mut summary = DispatchSummary::default();
        for run in &runs {
            summary.runs.push(self.process_run(run).await);
        }
        Ok(summary)
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, keyword = %run.keyword))]
    async fn process_run(&self, run: &Run) -> RunSummary {
        let summary = |result, report| RunSummary {
            run_id: run.id,
            keyword: run.keyword.clone(),
            result,
            report,
        };

        if let Err(e) = self.set_status(run.id, RunStatus::Running).await {
            error!(error = %e, "Could not mark run running, skipping");
            return summary(skipped("mark running", &e), None);
        }

        let points = match self.unranked_points(run.id).await {
            Ok(points) => points,
            Err(e) => {
                error!(error = %e, "Could not load points, skipping");
                return summary(skipped("load points", &e), None);
            }
        };

        if points.is_empty() {
            info!("No unranked points, marking done");
            let result = match self.set_status(run.id, RunStatus::Done).await {
                Ok(()) => RunResult::Done,
                Err(e) => {
                    error!(error = %e, "Could not mark run done");
                    skipped("mark done", &e)
                }
            };
            return summary(result, None);
        }

        let mut pool = WorkerPool::new(
            run,
            points,
            Arc::clone(&self.store),
            Arc::clone(&self.client),
            self.config.egress.clone(),
            self.config.pool.clone(),
        );

        let report = match pool.run_to_completion().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Pool stopped early");
                pool.report().clone()
            }
        };

        let result = self.finish_run(run.id).await;

        // Units are only torn down once the final status write has settled
        let aborted = pool.shutdown().await;
        if aborted > 0 {
            warn!(aborted, "Execution units aborted after grace period");
        }

        summary(result, Some(report))
    }

    /// Re-check the run's points and mark it done when none are left.
    async fn finish_run(&self, run_id: Uuid) -> RunResult {
        let remaining = match self.unranked_points(run_id).await {
            Ok(points) => points.len(),
            Err(e) => {
                error!(error = %e, "Could not re-check points");
                return skipped("re-check points", &e);
            }
        };

        if remaining > 0 {
            warn!(remaining, "Run has unmeasured points, leaving it running");
            return RunResult::Incomplete { remaining };
        }

        match self.set_status(run_id, RunStatus::Done).await {
            Ok(()) => {
                info!("Run done");
                RunResult::Done
            }
            Err(e) => {
                error!(error = %e, "Could not mark run done");
                skipped("mark done", &e)
            }
        }
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        self.config
            .pool
            .persistence_retry
            .retry(|_| self.store.set_run_status(run_id, status))
            .await
    }

    async fn unranked_points(&self, run_id: Uuid) -> Result<Vec<Point>, StoreError> {
        self.config
            .pool
            .persistence_retry
            .retry(|_| self.store.list_unranked_points(run_id))
            .await
    }
}

fn skipped(step: &str, error: &StoreError) -> RunResult {
    RunResult::Skipped {
        reason: format!("{step}: {error}"),
    }
}
