// gridrank-dispatch
//
// Drains every pending geo-grid run once and exits. A second invocation
// while one is running exits immediately with success.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gridrank_core::telemetry::{init_telemetry, TelemetryConfig};
use gridrank_core::HttpRankClient;
use gridrank_scheduler::{DispatchOutcome, PostgresRunStore, RunDispatcher, RunResult};
use gridrank_worker::{ShutdownSignal, WorkerSettings};
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "gridrank-dispatch")]
#[command(about = "Measure pending geo-grid runs through a bounded pool of execution units")]
#[command(version)]
struct Cli {
    /// Maximum concurrent execution units per run
    #[arg(
        value_name = "MAX_CONCURRENCY",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    max_concurrency: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; the environment may already be set
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _telemetry_guard = init_telemetry(TelemetryConfig::from_env("gridrank-dispatch"));

    let settings = WorkerSettings::from_env().context("Invalid dispatcher configuration")?;
    tracing::info!(
        max_concurrency = cli.max_concurrency,
        rank_service = %settings.rank_service_url,
        lock = %settings.lock_path.display(),
        proxied = !settings.egress.is_direct(),
        "gridrank-dispatch starting"
    );

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = PostgresRunStore::new(pool);
    if settings.migrate {
        store.migrate().await.context("Failed to apply migrations")?;
    }

    let client =
        HttpRankClient::new(settings.http_client_config()).context("Invalid rank service URL")?;

    let dispatcher = RunDispatcher::new(
        Arc::new(store),
        Arc::new(client),
        settings.dispatcher_config(usize::from(cli.max_concurrency)),
    );

    let mut shutdown = ShutdownSignal::install().context("Failed to install signal handlers")?;

    // Dropping the dispatcher future aborts the units and removes the lock
    tokio::select! {
        outcome = dispatcher.run() => {
            match outcome.context("Dispatcher failed")? {
                DispatchOutcome::AlreadyRunning => {
                    tracing::info!("Another dispatcher holds the lock, nothing to do");
                }
                DispatchOutcome::Finished(summary) => {
                    for run in &summary.runs {
                        match &run.result {
                            RunResult::Done => {
                                tracing::info!(run_id = %run.run_id, keyword = %run.keyword, "Run done");
                            }
                            RunResult::Incomplete { remaining } => {
                                tracing::warn!(run_id = %run.run_id, remaining, "Run left running");
                            }
                            RunResult::Skipped { reason } => {
                                tracing::warn!(run_id = %run.run_id, %reason, "Run skipped");
                            }
                        }
                    }
                    tracing::info!(runs = summary.runs.len(), done = summary.done(), "Dispatch complete");
                }
            }
        }
        signal = shutdown.recv() => {
            tracing::info!(signal, "Received shutdown signal, stopping dispatch");
        }
    }

    Ok(())
}
