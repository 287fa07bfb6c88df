//! Messages exchanged between the pool manager and its execution units
//!
//! Units and the manager share nothing mutable: a [`Task`] goes down a
//! unit's command channel and exactly one [`TaskResult`] comes back.

use std::sync::Arc;

use gridrank_core::{
    AcquisitionRequest, AcquisitionResponse, BusinessContext, EgressConfig, GeoOrigin, Point,
    ReasonCode, Run,
};
use uuid::Uuid;

/// Index of an execution unit within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Run-level data every task of a run carries
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub keyword: String,
    pub business: BusinessContext,
    pub egress: EgressConfig,
}

impl RunContext {
    pub fn from_run(run: &Run, egress: EgressConfig) -> Self {
        Self {
            run_id: run.id,
            keyword: run.keyword.clone(),
            business: BusinessContext {
                id: run.business_id.clone(),
                name: run.business_name.clone(),
            },
            egress,
        }
    }
}

/// One point bound to its run context, in flight to a single unit
#[derive(Debug, Clone)]
pub struct Task {
    pub point: Point,
    pub context: Arc<RunContext>,
}

impl Task {
    pub fn request(&self) -> AcquisitionRequest {
        AcquisitionRequest {
            keyword: self.context.keyword.clone(),
            origin: GeoOrigin {
                lat: self.point.lat,
                lng: self.point.lng,
            },
            business: self.context.business.clone(),
            egress: self.context.egress.clone(),
        }
    }
}

/// What an idle unit can be told to do
#[derive(Debug)]
pub enum WorkerCommand {
    Execute(Task),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The acquisition returned a structured response (found or not)
    Success,
    /// Retries exhausted, a non-retryable error, or a unit fault
    Error,
}

/// The single report a unit sends back for each task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub worker_id: WorkerId,
    pub point_id: Uuid,
    pub outcome: TaskOutcome,
    pub rank: Option<i32>,
    pub reason: ReasonCode,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(worker_id: WorkerId, point_id: Uuid, response: AcquisitionResponse) -> Self {
        Self {
            worker_id,
            point_id,
            outcome: TaskOutcome::Success,
            rank: response.rank,
            reason: response.reason,
            error: None,
        }
    }

    pub fn error(
        worker_id: WorkerId,
        point_id: Uuid,
        reason: ReasonCode,
        error: impl Into<String>,
    ) -> Self {
        Self {
            worker_id,
            point_id,
            outcome: TaskOutcome::Error,
            rank: None,
            reason,
            error: Some(error.into()),
        }
    }
}

/// Lifecycle of a unit as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawned,
    Idle,
    Busy,
    Exiting,
    Exited,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridrank_core::RunStatus;

    #[test]
    fn test_task_request_carries_run_context() {
        let run = Run {
            id: Uuid::now_v7(),
            keyword: "plumber".into(),
            business_id: "biz-9".into(),
            business_name: "Pipe Dreams".into(),
            status: RunStatus::Running,
            created_at: Utc::now(),
        };
        let context = Arc::new(RunContext::from_run(
            &run,
            EgressConfig::direct().with_proxy("http://proxy:1"),
        ));
        let task = Task {
            point: Point::new(run.id, 51.5, -0.12),
            context,
        };

        let request = task.request();
        assert_eq!(request.keyword, "plumber");
        assert_eq!(request.origin, GeoOrigin { lat: 51.5, lng: -0.12 });
        assert_eq!(request.business.name, "Pipe Dreams");
        assert_eq!(request.egress.proxy_url.as_deref(), Some("http://proxy:1"));
    }

    #[test]
    fn test_result_constructors() {
        let point_id = Uuid::now_v7();
        let ok = TaskResult::success(WorkerId(1), point_id, AcquisitionResponse::found(4));
        assert_eq!(ok.outcome, TaskOutcome::Success);
        assert_eq!(ok.rank, Some(4));
        assert!(ok.error.is_none());

        let failed = TaskResult::error(WorkerId(2), point_id, ReasonCode::TransportError, "reset");
        assert_eq!(failed.outcome, TaskOutcome::Error);
        assert_eq!(failed.rank, None);
        assert_eq!(failed.error.as_deref(), Some("reset"));
        assert_eq!(WorkerId(2).to_string(), "worker-2");
    }
}
