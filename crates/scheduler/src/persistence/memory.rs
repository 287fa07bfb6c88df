//! In-memory implementation of RunStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridrank_core::{Point, Run, RunStatus};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::store::*;

/// Store operations, used to inject faults and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    ListPendingRuns,
    SetRunStatus,
    ListUnrankedPoints,
    SetPointRank,
}

/// In-memory implementation of RunStore
///
/// Keeps the same semantics as the PostgreSQL implementation and adds
/// helpers to seed data, inject transient failures and inspect writes.
///
/// # Example
///
/// ```
/// use gridrank_scheduler::{InMemoryRunStore, StoreOperation};
///
/// let store = InMemoryRunStore::new();
/// store.fail_next(StoreOperation::SetPointRank, 2);
/// ```
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, Run>>,
    points: RwLock<HashMap<Uuid, Point>>,
    /// Point ids per run in insertion order
    grid: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    status_writes: RwLock<Vec<(Uuid, RunStatus)>>,
    faults: Mutex<HashMap<StoreOperation, u32>>,
    calls: Mutex<HashMap<StoreOperation, u32>>,
}

impl InMemoryRunStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a run together with its points
    pub fn insert_run(&self, run: Run, points: Vec<Point>) {
        let run_id = run.id;
        let mut stored = self.points.write();
        let mut ids = Vec::with_capacity(points.len());
        for point in points {
            ids.push(point.id);
            stored.insert(point.id, point);
        }
        self.grid.write().entry(run_id).or_default().extend(ids);
        self.runs.write().insert(run_id, run);
    }

    /// Make the next `count` calls of `operation` fail with a database error
    pub fn fail_next(&self, operation: StoreOperation, count: u32) {
        self.faults.lock().insert(operation, count);
    }

    /// Number of calls made to `operation`, including failed ones
    pub fn calls(&self, operation: StoreOperation) -> u32 {
        self.calls.lock().get(&operation).copied().unwrap_or(0)
    }

    pub fn run(&self, run_id: Uuid) -> Option<Run> {
        self.runs.read().get(&run_id).cloned()
    }

    pub fn point(&self, point_id: Uuid) -> Option<Point> {
        self.points.read().get(&point_id).cloned()
    }

    /// All points of a run in insertion order
    pub fn points_for(&self, run_id: Uuid) -> Vec<Point> {
        let points = self.points.read();
        self.grid
            .read()
            .get(&run_id)
            .map(|ids| ids.iter().filter_map(|id| points.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Every status change for a run, in order
    pub fn status_history(&self, run_id: Uuid) -> Vec<RunStatus> {
        self.status_writes
            .read()
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn enter(&self, operation: StoreOperation) -> Result<(), StoreError> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;

        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Database(format!(
                    "injected fault on {:?}",
                    operation
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn list_pending_runs(&self) -> Result<Vec<Run>, StoreError> {
        self.enter(StoreOperation::ListPendingRuns)?;

        let mut runs: Vec<Run> = self
            .runs
            .read()
            .values()
            .filter(|run| run.status.is_pending())
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }

    async fn set_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        self.enter(StoreOperation::SetRunStatus)?;

        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if run.status == status {
            return Ok(());
        }
        run.status = status;
        self.status_writes.write().push((run_id, status));
        Ok(())
    }

    async fn list_unranked_points(&self, run_id: Uuid) -> Result<Vec<Point>, StoreError> {
        self.enter(StoreOperation::ListUnrankedPoints)?;

        Ok(self
            .points_for(run_id)
            .into_iter()
            .filter(|point| !point.is_measured())
            .collect())
    }

    async fn set_point_rank(
        &self,
        point_id: Uuid,
        rank: i32,
        measured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.enter(StoreOperation::SetPointRank)?;

        let mut points = self.points.write();
        let point = points
            .get_mut(&point_id)
            .ok_or(StoreError::PointNotFound(point_id))?;
        if point.rank.is_none() {
            point.rank = Some(rank);
            point.measured_at = Some(measured_at);
        }
        Ok(())
    }
}
