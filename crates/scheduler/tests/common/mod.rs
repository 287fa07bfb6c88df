//! Shared fixtures for scheduler integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gridrank_core::{
    AcquisitionError, AcquisitionRequest, AcquisitionResponse, Point, RankAcquisition, Run,
    RunStatus,
};
use gridrank_scheduler::{CircuitBreakerConfig, RetryPolicy, WorkerPoolConfig};
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

type Responder =
    dyn Fn(&AcquisitionRequest) -> Result<AcquisitionResponse, AcquisitionError> + Send + Sync;
type Latency = dyn Fn(&AcquisitionRequest) -> Duration + Send + Sync;

/// One acquisition as seen by the client
#[derive(Debug, Clone, Copy)]
pub struct Call {
    /// Latitude of the requested point; fixtures use the grid index
    pub lat: f64,
    pub at: Instant,
}

/// Acquisition client whose answers and latencies are scripted per point.
/// Tracks how many calls are in flight at once.
pub struct ScriptedClient {
    respond: Box<Responder>,
    latency: Box<Latency>,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub fn new<R>(respond: R) -> Self
    where
        R: Fn(&AcquisitionRequest) -> Result<AcquisitionResponse, AcquisitionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            respond: Box::new(respond),
            latency: Box::new(|_| Duration::from_secs(1)),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every point found at rank 1
    pub fn always_found() -> Self {
        Self::new(|_| Ok(AcquisitionResponse::found(1)))
    }

    pub fn with_latency<L>(mut self, latency: L) -> Self
    where
        L: Fn(&AcquisitionRequest) -> Duration + Send + Sync + 'static,
    {
        self.latency = Box::new(latency);
        self
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RankAcquisition for ScriptedClient {
    async fn acquire(
        &self,
        request: &AcquisitionRequest,
    ) -> Result<AcquisitionResponse, AcquisitionError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(Call {
            lat: request.origin.lat,
            at: Instant::now(),
        });

        tokio::time::sleep((self.latency)(request)).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(request)
    }
}

pub fn run(keyword: &str, minutes_ago: i64) -> Run {
    Run {
        id: Uuid::now_v7(),
        keyword: keyword.to_string(),
        business_id: "biz-7".to_string(),
        business_name: "Corner Espresso".to_string(),
        status: RunStatus::Queued,
        created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
    }
}

/// `count` unmeasured points whose latitude is their grid index
pub fn grid(run: &Run, count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| Point::new(run.id, i as f64, 0.0))
        .collect()
}

/// Pool settings with no pacing and single-attempt acquisitions
pub fn fast_pool(max_concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new()
        .with_max_concurrency(max_concurrency)
        .with_inter_dispatch_delay(Duration::ZERO)
        .with_acquisition_retry(RetryPolicy::no_retry())
        .with_circuit_breaker(CircuitBreakerConfig::default())
}
