//! RunStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridrank_core::{Point, Run, RunStatus};
use uuid::Uuid;

use crate::reliability::Retryable;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Point not found
    #[error("point not found: {0}")]
    PointNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// A persisted value could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Persistence boundary for runs and their grid points
///
/// Every call may fail transiently. Implementations do not retry internally;
/// callers wrap calls in their own [`RetryPolicy`](crate::RetryPolicy).
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    /// Runs with status `queued` or `running`, oldest first
    async fn list_pending_runs(&self) -> Result<Vec<Run>, StoreError>;

    /// Set the status of a run. Writing the current status again is a no-op.
    async fn set_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError>;

    /// Points of a run that have no rank yet, in grid order
    async fn list_unranked_points(&self, run_id: Uuid) -> Result<Vec<Point>, StoreError>;

    /// Record the rank of a point
    ///
    /// A point that already holds a rank keeps it; the call still succeeds.
    async fn set_point_rank(
        &self,
        point_id: Uuid,
        rank: i32,
        measured_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
