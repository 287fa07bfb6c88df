// Environment configuration for the dispatch worker
//
// Variables:
// - DATABASE_URL (required)
// - RANK_SERVICE_URL, RANK_SERVICE_TIMEOUT_SECS
// - GRIDRANK_LOCK_PATH
// - EGRESS_PROXY_URL, EGRESS_PROXY_USERNAME, EGRESS_PROXY_PASSWORD (secret)
// - PAUSE_DURATION_SECS, INTER_DISPATCH_DELAY_MS
// - GRIDRANK_MIGRATE

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use gridrank_core::{EgressConfig, HttpRankClientConfig};
use gridrank_scheduler::{CircuitBreakerConfig, DispatcherConfig, WorkerPoolConfig};

const DEFAULT_RANK_SERVICE_URL: &str = "http://127.0.0.1:8085/rank";
const DEFAULT_LOCK_FILE: &str = "gridrank-dispatcher.pid";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Settings read once at startup
#[derive(Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub rank_service_url: String,
    pub rank_service_timeout: Duration,
    pub lock_path: PathBuf,
    pub egress: EgressConfig,
    pub pause_duration: Duration,
    pub inter_dispatch_delay: Duration,
    /// Apply embedded migrations before dispatching
    pub migrate: bool,
}

// database_url may embed a password
impl std::fmt::Debug for WorkerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSettings")
            .field("database_url", &"[REDACTED]")
            .field("rank_service_url", &self.rank_service_url)
            .field("rank_service_timeout", &self.rank_service_timeout)
            .field("lock_path", &self.lock_path)
            .field("egress", &self.egress)
            .field("pause_duration", &self.pause_duration)
            .field("inter_dispatch_delay", &self.inter_dispatch_delay)
            .field("migrate", &self.migrate)
            .finish()
    }
}

impl WorkerSettings {
    /// Create settings from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create settings from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let rank_service_url =
            var("RANK_SERVICE_URL").unwrap_or_else(|| DEFAULT_RANK_SERVICE_URL.to_string());

        let rank_service_timeout = Duration::from_secs(parse_or(
            "RANK_SERVICE_TIMEOUT_SECS",
            var("RANK_SERVICE_TIMEOUT_SECS"),
            120,
        )?);

        let lock_path = var("GRIDRANK_LOCK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_LOCK_FILE));

        let mut egress = EgressConfig::direct();
        if let Some(proxy) = var("EGRESS_PROXY_URL") {
            egress = egress.with_proxy(proxy);
        }
        egress.username = var("EGRESS_PROXY_USERNAME");
        egress.password = var("EGRESS_PROXY_PASSWORD");

        let defaults = CircuitBreakerConfig::default();
        let pause_duration = Duration::from_secs(parse_or(
            "PAUSE_DURATION_SECS",
            var("PAUSE_DURATION_SECS"),
            defaults.pause_duration.as_secs(),
        )?);

        let inter_dispatch_delay = Duration::from_millis(parse_or(
            "INTER_DISPATCH_DELAY_MS",
            var("INTER_DISPATCH_DELAY_MS"),
            WorkerPoolConfig::default().inter_dispatch_delay.as_millis() as u64,
        )?);

        let migrate = parse_or("GRIDRANK_MIGRATE", var("GRIDRANK_MIGRATE"), false)?;

        Ok(Self {
            database_url,
            rank_service_url,
            rank_service_timeout,
            lock_path,
            egress,
            pause_duration,
            inter_dispatch_delay,
            migrate,
        })
    }

    pub fn http_client_config(&self) -> HttpRankClientConfig {
        HttpRankClientConfig::new(self.rank_service_url.clone())
            .with_request_timeout(self.rank_service_timeout)
    }

    pub fn dispatcher_config(&self, max_concurrency: usize) -> DispatcherConfig {
        let pool = WorkerPoolConfig::default()
            .with_max_concurrency(max_concurrency)
            .with_inter_dispatch_delay(self.inter_dispatch_delay)
            .with_circuit_breaker(
                CircuitBreakerConfig::default().with_pause_duration(self.pause_duration),
            );

        DispatcherConfig::new(self.lock_path.clone())
            .with_pool(pool)
            .with_egress(self.egress.clone())
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
