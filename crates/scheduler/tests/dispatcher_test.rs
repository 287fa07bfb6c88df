//! RunDispatcher end-to-end against the in-memory store

mod common;

use std::sync::Arc;

use common::{fast_pool, grid, run, ScriptedClient};
use gridrank_core::{AcquisitionError, AcquisitionResponse, RunStatus};
use gridrank_scheduler::{
    DispatchError, DispatchOutcome, DispatcherConfig, InMemoryRunStore, LockManager,
    RunDispatcher, RunResult, RunStore, StoreOperation,
};
use tempfile::TempDir;

fn dispatcher(
    dir: &TempDir,
    store: &Arc<InMemoryRunStore>,
    client: ScriptedClient,
) -> RunDispatcher {
    let config = DispatcherConfig::new(dir.path().join("dispatcher.pid")).with_pool(fast_pool(2));
    RunDispatcher::new(store.clone(), Arc::new(client), config)
}

fn finished(outcome: DispatchOutcome) -> gridrank_scheduler::DispatchSummary {
    match outcome {
        DispatchOutcome::Finished(summary) => summary,
        DispatchOutcome::AlreadyRunning => panic!("dispatcher reported another instance"),
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_drains_pending_runs_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let newer = run("florist", 5);
    let older = run("tailor", 50);
    store.insert_run(newer.clone(), grid(&newer, 4));
    store.insert_run(older.clone(), grid(&older, 3));

    let dispatcher = dispatcher(&dir, &store, ScriptedClient::always_found());
    let summary = finished(dispatcher.run().await.unwrap());

    let order: Vec<_> = summary.runs.iter().map(|r| r.run_id).collect();
    assert_eq!(order, vec![older.id, newer.id]);
    assert_eq!(summary.done(), 2);

    for run in [&older, &newer] {
        assert_eq!(store.run(run.id).unwrap().status, RunStatus::Done);
        assert_eq!(
            store.status_history(run.id),
            vec![RunStatus::Running, RunStatus::Done]
        );
        assert!(store.points_for(run.id).iter().all(|p| p.rank == Some(1)));
    }

    let report = summary.runs[0].report.clone().unwrap();
    assert_eq!(report.total_points, 3);
    assert_eq!(report.ranked, 3);

    // lock released on the way out
    assert!(!LockManager::new(dir.path().join("dispatcher.pid")).is_held());
}

#[tokio::test]
async fn test_run_without_unranked_points_is_marked_done() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let empty = run("locksmith", 1);
    store.insert_run(empty.clone(), vec![]);

    let client = ScriptedClient::always_found();
    let dispatcher = dispatcher(&dir, &store, client);
    let summary = finished(dispatcher.run().await.unwrap());

    assert_eq!(summary.runs.len(), 1);
    assert_eq!(summary.runs[0].result, RunResult::Done);
    // no pool, so no units were spawned
    assert!(summary.runs[0].report.is_none());
    assert_eq!(
        store.status_history(empty.id),
        vec![RunStatus::Running, RunStatus::Done]
    );
}

#[tokio::test]
async fn test_held_lock_exits_without_touching_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let pending = run("bookshop", 1);
    store.insert_run(pending.clone(), grid(&pending, 2));

    let other = LockManager::new(dir.path().join("dispatcher.pid"))
        .acquire()
        .unwrap();

    let dispatcher = dispatcher(&dir, &store, ScriptedClient::always_found());
    let outcome = dispatcher.run().await.unwrap();

    assert!(matches!(outcome, DispatchOutcome::AlreadyRunning));
    assert_eq!(store.calls(StoreOperation::ListPendingRuns), 0);
    assert_eq!(store.calls(StoreOperation::SetRunStatus), 0);
    assert_eq!(store.run(pending.id).unwrap().status, RunStatus::Queued);

    // the other holder's marker is untouched
    assert!(other.path().exists());
}

#[tokio::test(start_paused = true)]
async fn test_errored_point_keeps_run_running_until_next_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let target = run("cobbler", 1);
    let points = grid(&target, 3);
    let lost = points[2].id;
    store.insert_run(target.clone(), points);

    let flaky = ScriptedClient::new(|req| {
        if req.origin.lat == 2.0 {
            Err(AcquisitionError::Unavailable {
                status: 503,
                message: "no browser available".into(),
            })
        } else {
            Ok(AcquisitionResponse::found(6))
        }
    });
    let summary = finished(dispatcher(&dir, &store, flaky).run().await.unwrap());

    assert_eq!(
        summary.runs[0].result,
        RunResult::Incomplete { remaining: 1 }
    );
    assert_eq!(summary.runs[0].report.as_ref().unwrap().errored, 1);
    assert_eq!(store.point(lost).unwrap().rank, None);
    assert_eq!(store.run(target.id).unwrap().status, RunStatus::Running);

    // the next invocation picks the run up again and measures only the lost point
    let healthy = ScriptedClient::always_found();
    let dispatcher = dispatcher(&dir, &store, healthy);
    let summary = finished(dispatcher.run().await.unwrap());

    assert_eq!(summary.runs[0].result, RunResult::Done);
    assert_eq!(summary.runs[0].report.as_ref().unwrap().total_points, 1);
    assert_eq!(store.point(lost).unwrap().rank, Some(1));
    assert_eq!(store.run(target.id).unwrap().status, RunStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_run_is_skipped_and_next_run_processed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let first = run("optician", 30);
    let second = run("bakery", 10);
    store.insert_run(first.clone(), grid(&first, 2));
    store.insert_run(second.clone(), grid(&second, 2));

    // all three attempts to mark the first run running fail
    store.fail_next(StoreOperation::SetRunStatus, 3);

    let summary = finished(
        dispatcher(&dir, &store, ScriptedClient::always_found())
            .run()
            .await
            .unwrap(),
    );

    assert!(matches!(summary.runs[0].result, RunResult::Skipped { .. }));
    assert_eq!(store.run(first.id).unwrap().status, RunStatus::Queued);
    assert!(store.points_for(first.id).iter().all(|p| p.rank.is_none()));

    assert_eq!(summary.runs[1].result, RunResult::Done);
    assert_eq!(store.run(second.id).unwrap().status, RunStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let target = run("barber", 1);
    store.insert_run(target.clone(), grid(&target, 1));
    store.fail_next(StoreOperation::SetRunStatus, 2);

    let summary = finished(
        dispatcher(&dir, &store, ScriptedClient::always_found())
            .run()
            .await
            .unwrap(),
    );

    assert_eq!(summary.runs[0].result, RunResult::Done);
    // two failed attempts, the successful one, then done
    assert_eq!(store.calls(StoreOperation::SetRunStatus), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_store_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    store.fail_next(StoreOperation::ListPendingRuns, 3);

    let result = dispatcher(&dir, &store, ScriptedClient::always_found())
        .run()
        .await;

    assert!(matches!(result, Err(DispatchError::Store(_))));
    assert!(!LockManager::new(dir.path().join("dispatcher.pid")).is_held());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_dispatch_removes_lock_marker() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let target = run("tailor", 1);
    store.insert_run(target.clone(), grid(&target, 4));

    let lock = LockManager::new(dir.path().join("dispatcher.pid"));
    let dispatcher = dispatcher(&dir, &store, ScriptedClient::always_found());

    // Acquisitions take 1s, so the dispatch is dropped mid-run
    let cut_short =
        tokio::time::timeout(std::time::Duration::from_millis(500), dispatcher.run()).await;
    assert!(cut_short.is_err());

    assert!(!lock.is_held());
    assert!(store.points_for(target.id).iter().all(|p| p.rank.is_none()));
    assert_eq!(store.run(target.id).unwrap().status, RunStatus::Running);
}

#[tokio::test]
async fn test_marking_done_twice_is_harmless() {
    let store = InMemoryRunStore::new();
    let target = run("gallery", 1);
    store.insert_run(target.clone(), vec![]);

    store.set_run_status(target.id, RunStatus::Done).await.unwrap();
    store.set_run_status(target.id, RunStatus::Done).await.unwrap();

    assert_eq!(store.run(target.id).unwrap().status, RunStatus::Done);
    assert_eq!(store.status_history(target.id), vec![RunStatus::Done]);
    assert!(store.list_pending_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finished_runs_are_not_revisited() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());
    let target = run("pharmacy", 1);
    store.insert_run(target.clone(), vec![]);

    let first = finished(
        dispatcher(&dir, &store, ScriptedClient::always_found())
            .run()
            .await
            .unwrap(),
    );
    let second = finished(
        dispatcher(&dir, &store, ScriptedClient::always_found())
            .run()
            .await
            .unwrap(),
    );

    assert_eq!(first.done(), 1);
    assert!(second.runs.is_empty());
}
