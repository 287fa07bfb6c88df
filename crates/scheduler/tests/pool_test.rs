//! WorkerPool behaviour against the in-memory store and scripted clients

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_pool, grid, run, ScriptedClient};
use gridrank_core::{
    AcquisitionError, AcquisitionResponse, EgressConfig, ReasonCode, NOT_FOUND_RANK,
};
use gridrank_scheduler::{
    CircuitState, InMemoryRunStore, RetryPolicy, StoreOperation, WorkerPool, WorkerPoolConfig,
    WorkerPoolError, WorkerState,
};
use tokio::time::Instant;

fn pool_for(
    store: &Arc<InMemoryRunStore>,
    client: &Arc<ScriptedClient>,
    points: usize,
    config: WorkerPoolConfig,
) -> (WorkerPool, Vec<uuid::Uuid>) {
    let run = run("espresso bar", 0);
    let points = grid(&run, points);
    let ids = points.iter().map(|p| p.id).collect();
    store.insert_run(run.clone(), points.clone());
    let pool = WorkerPool::new(
        &run,
        points,
        store.clone(),
        client.clone(),
        EgressConfig::direct(),
        config,
    );
    (pool, ids)
}

#[tokio::test(start_paused = true)]
async fn test_freed_worker_takes_next_point() {
    // point 0 is quick, point 1 slow, point 2 quick
    let client = Arc::new(ScriptedClient::always_found().with_latency(|req| {
        if req.origin.lat == 1.0 {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(1)
        }
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, ids) = pool_for(&store, &client, 3, fast_pool(2));
    assert_eq!(pool.size(), 2);

    let started = Instant::now();
    let report = pool.run_to_completion().await.unwrap();
    let elapsed = started.elapsed();

    let calls = client.calls();
    let order: Vec<f64> = calls.iter().map(|c| c.lat).collect();
    assert_eq!(order, vec![0.0, 1.0, 2.0]);
    assert_eq!(calls[0].at, started);
    assert_eq!(calls[1].at, started);
    // point 2 goes out as soon as point 0 reports, while point 1 is still busy
    assert_eq!(calls[2].at, started + Duration::from_secs(1));

    // resolves only once the slow point has reported
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.ranked, 3);
    assert_eq!(report.peak_in_flight, 2);
    for id in ids {
        assert_eq!(store.point(id).unwrap().rank, Some(1));
    }

    assert_eq!(pool.shutdown().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_concurrency() {
    let client = Arc::new(
        ScriptedClient::always_found()
            .with_latency(|req| Duration::from_millis(200 + (req.origin.lat as u64 % 7) * 150)),
    );
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, _) = pool_for(&store, &client, 25, fast_pool(3));

    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(client.peak_concurrency(), 3);
    assert_eq!(report.peak_in_flight, 3);
    assert_eq!(report.dispatched, 25);
    assert_eq!(client.calls().len(), 25);
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_smaller_than_concurrency_for_few_points() {
    let client = Arc::new(ScriptedClient::always_found());
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, _) = pool_for(&store, &client, 2, fast_pool(5));

    assert_eq!(pool.size(), 2);
    pool.run_to_completion().await.unwrap();
    assert!(pool.run_to_completion().await.is_err());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failure_rate_pauses_then_flushes_buffered_workers() {
    // first ten points are blocked, the rest found
    let client = Arc::new(ScriptedClient::new(|req| {
        if req.origin.lat < 10.0 {
            Ok(AcquisitionResponse::unranked(ReasonCode::Blocked))
        } else {
            Ok(AcquisitionResponse::found(3))
        }
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let config = fast_pool(2).with_inter_dispatch_delay(Duration::from_secs(1));
    let (mut pool, ids) = pool_for(&store, &client, 14, config);

    let started = Instant::now();
    let report = pool.run_to_completion().await.unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 14);

    // results come back in pairs every 2s; the 10th outcome lands at t=9s
    let before_pause: Vec<_> = calls.iter().filter(|c| c.at < started + Duration::from_secs(10)).collect();
    assert_eq!(before_pause.len(), 10);

    // nothing dispatched for five minutes, then both buffered units in the same tick
    let resumed_at = started + Duration::from_secs(9) + Duration::from_secs(300);
    assert_eq!(calls[10].at, resumed_at);
    assert_eq!(calls[11].at, resumed_at);
    assert!(calls[12].at > resumed_at);

    // the window restarted empty, so the fresh successes did not re-trip it
    assert_eq!(report.pauses, 1);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);

    assert_eq!(report.unranked, 10);
    assert_eq!(report.ranked, 4);
    assert_eq!(store.point(ids[0]).unwrap().rank, Some(NOT_FOUND_RANK));
    assert_eq!(store.point(ids[13]).unwrap().rank, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_breach_lands_before_same_tick_dispatch() {
    // no inter-dispatch delay: both units report the 9th and 10th outcomes at t=5s
    let client = Arc::new(ScriptedClient::new(|_| {
        Ok(AcquisitionResponse::unranked(ReasonCode::Blocked))
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, _) = pool_for(&store, &client, 12, fast_pool(2));

    let started = Instant::now();
    let report = pool.run_to_completion().await.unwrap();

    let calls = client.calls();
    let before_pause = calls
        .iter()
        .filter(|c| c.at < started + Duration::from_secs(300))
        .count();
    assert_eq!(before_pause, 10);
    assert_eq!(calls[10].at, started + Duration::from_secs(305));
    assert_eq!(report.pauses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_pool_never_pauses() {
    // one in three blocked stays under the threshold
    let client = Arc::new(ScriptedClient::new(|req| {
        if req.origin.lat as u64 % 3 == 0 {
            Ok(AcquisitionResponse::unranked(ReasonCode::NotFound))
        } else {
            Ok(AcquisitionResponse::found(8))
        }
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, _) = pool_for(&store, &client, 30, fast_pool(1));

    let started = Instant::now();
    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(report.pauses, 0);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_error_outcome_leaves_point_unmeasured() {
    let client = Arc::new(ScriptedClient::new(|req| {
        if req.origin.lat == 1.0 {
            Err(AcquisitionError::Rejected {
                status: 400,
                message: "keyword too long".into(),
            })
        } else {
            Ok(AcquisitionResponse::found(2))
        }
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, ids) = pool_for(&store, &client, 3, fast_pool(2));

    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(report.errored, 1);
    assert_eq!(report.ranked, 2);
    assert_eq!(store.point(ids[1]).unwrap().rank, None);
    assert_eq!(store.point(ids[0]).unwrap().rank, Some(2));
    // a rejected request is not retried
    assert_eq!(client.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_use_acquisition_retry() {
    let client = Arc::new(ScriptedClient::new(|_| {
        Err(AcquisitionError::transport("proxy refused connection"))
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let config = fast_pool(1).with_acquisition_retry(RetryPolicy::acquisition());
    let (mut pool, ids) = pool_for(&store, &client, 1, config);

    let started = Instant::now();
    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(client.calls().len(), 3);
    // 3 x 1s latency plus 2s and 4s of backoff
    assert_eq!(started.elapsed(), Duration::from_secs(9));
    assert_eq!(report.errored, 1);
    assert_eq!(store.point(ids[0]).unwrap().rank, None);
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_counts_as_failure() {
    let client = Arc::new(ScriptedClient::always_found());
    let store = Arc::new(InMemoryRunStore::new());
    // exhausts the three write attempts for the first point only
    store.fail_next(StoreOperation::SetPointRank, 3);
    let (mut pool, ids) = pool_for(&store, &client, 2, fast_pool(1));

    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(report.persist_failures, 1);
    assert_eq!(report.ranked, 1);
    assert_eq!(store.point(ids[0]).unwrap().rank, None);
    assert_eq!(store.point(ids[1]).unwrap().rank, Some(1));
    assert_eq!(store.calls(StoreOperation::SetPointRank), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transient_write_failure_is_retried() {
    let client = Arc::new(ScriptedClient::always_found());
    let store = Arc::new(InMemoryRunStore::new());
    store.fail_next(StoreOperation::SetPointRank, 2);
    let (mut pool, ids) = pool_for(&store, &client, 1, fast_pool(1));

    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(report.persist_failures, 0);
    assert_eq!(store.point(ids[0]).unwrap().rank, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_client_reports_worker_fault() {
    let client = Arc::new(ScriptedClient::new(|req| {
        if req.origin.lat == 0.0 {
            panic!("unexpected page layout");
        }
        Ok(AcquisitionResponse::found(5))
    }));
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, ids) = pool_for(&store, &client, 3, fast_pool(2));

    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(report.errored, 1);
    assert_eq!(report.ranked, 2);
    assert_eq!(store.point(ids[0]).unwrap().rank, None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_unit() {
    let client = Arc::new(ScriptedClient::always_found());
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, _) = pool_for(&store, &client, 6, fast_pool(3));

    pool.run_to_completion().await.unwrap();
    let aborted = pool.shutdown().await;

    assert_eq!(aborted, 0);
    assert!(pool
        .worker_states()
        .iter()
        .all(|s| *s == WorkerState::Exited));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_unit_after_grace() {
    let client = Arc::new(ScriptedClient::always_found().with_latency(|_| Duration::from_secs(3600)));
    let store = Arc::new(InMemoryRunStore::new());
    let config = fast_pool(1).with_shutdown_grace(Duration::from_secs(10));
    let (mut pool, _) = pool_for(&store, &client, 1, config);

    let stuck = tokio::time::timeout(Duration::from_secs(60), pool.run_to_completion()).await;
    assert!(stuck.is_err());
    assert_eq!(pool.in_flight(), 1);

    let started = Instant::now();
    let aborted = pool.shutdown().await;

    assert_eq!(aborted, 1);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn test_empty_pool_completes_immediately() {
    let client = Arc::new(ScriptedClient::always_found());
    let store = Arc::new(InMemoryRunStore::new());
    let (mut pool, _) = pool_for(&store, &client, 0, fast_pool(4));

    let report = pool.run_to_completion().await.unwrap();

    assert_eq!(pool.size(), 0);
    assert_eq!(report.dispatched, 0);
    assert!(client.calls().is_empty());
    assert!(matches!(
        pool.run_to_completion().await,
        Err(WorkerPoolError::AlreadyStarted)
    ));
}
