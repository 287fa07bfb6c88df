//! Execution unit: one spawned task handling one grid point at a time

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use gridrank_core::{RankAcquisition, ReasonCode};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use super::message::{Task, TaskResult, WorkerCommand, WorkerId, WorkerState};
use crate::reliability::RetryPolicy;

/// Manager-side handle of a spawned unit
pub(crate) struct WorkerHandle {
    pub(crate) id: WorkerId,
    pub(crate) state: WorkerState,
    commands: mpsc::Sender<WorkerCommand>,
    pub(crate) join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Hand a command to the unit. Gives the command back if the unit is gone.
    pub(crate) fn send(&self, command: WorkerCommand) -> Result<(), WorkerCommand> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(command) | TrySendError::Closed(command) => command,
        })
    }
}

/// Spawn a unit that reports into `results`.
pub(crate) fn spawn_unit(
    id: WorkerId,
    client: Arc<dyn RankAcquisition>,
    retry: RetryPolicy,
    results: mpsc::Sender<TaskResult>,
) -> WorkerHandle {
    // An idle unit holds at most one pending command
    let (commands, inbox) = mpsc::channel(1);
    let span = info_span!("execution_unit", worker_id = %id);
    let join = tokio::spawn(run_unit(id, inbox, client, retry, results).instrument(span));

    WorkerHandle {
        id,
        state: WorkerState::Spawned,
        commands,
        join,
    }
}

async fn run_unit(
    id: WorkerId,
    mut inbox: mpsc::Receiver<WorkerCommand>,
    client: Arc<dyn RankAcquisition>,
    retry: RetryPolicy,
    results: mpsc::Sender<TaskResult>,
) {
    while let Some(command) = inbox.recv().await {
        match command {
            WorkerCommand::Execute(task) => {
                let result = execute(id, &task, client.as_ref(), &retry).await;
                if results.send(result).await.is_err() {
                    debug!("Result channel closed, stopping");
                    break;
                }
            }
            WorkerCommand::Exit => {
                debug!("Exit requested");
                break;
            }
        }
    }
}

/// Run one task through the retry policy and turn whatever happens into a
/// result, including a panic inside the acquisition client.
pub(crate) async fn execute(
    id: WorkerId,
    task: &Task,
    client: &dyn RankAcquisition,
    retry: &RetryPolicy,
) -> TaskResult {
    let point_id = task.point.id;
    let request = task.request();
    let request = &request;

    let attempts = retry.retry(move |attempt| {
        debug!(%point_id, attempt, "Acquiring rank");
        client.acquire(request)
    });

    match AssertUnwindSafe(attempts).catch_unwind().await {
        Ok(Ok(response)) => {
            debug!(%point_id, rank = ?response.rank, reason = %response.reason, "Acquisition finished");
            TaskResult::success(id, point_id, response)
        }
        Ok(Err(error)) => {
            warn!(%point_id, error = %error, "Acquisition failed");
            TaskResult::error(id, point_id, error.reason(), error.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(%point_id, panic = %message, "Execution unit faulted");
            TaskResult::error(id, point_id, ReasonCode::WorkerFault, message)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
