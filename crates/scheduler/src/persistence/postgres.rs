//! PostgreSQL implementation of RunStore
//!
//! Tables live in `migrations/`. Points are ordered by id, which is a
//! time-ordered UUIDv7 for points created through [`Point::new`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridrank_core::{Point, Run, RunStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

/// PostgreSQL implementation of RunStore
///
/// # Example
///
/// ```ignore
/// use gridrank_scheduler::PostgresRunStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/gridrank").await?;
/// let store = PostgresRunStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }
}

fn run_from_row(row: &PgRow) -> Result<Run, StoreError> {
    let status: String = row.get("status");
    Ok(Run {
        id: row.get("id"),
        keyword: row.get("keyword"),
        business_id: row.get("business_id"),
        business_name: row.get("business_name"),
        status: RunStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown run status: {status}")))?,
        created_at: row.get("created_at"),
    })
}

fn point_from_row(row: &PgRow) -> Point {
    Point {
        id: row.get("id"),
        run_id: row.get("run_id"),
        lat: row.get("lat"),
        lng: row.get("lng"),
        rank: row.get("rank"),
        measured_at: row.get("measured_at"),
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self))]
    async fn list_pending_runs(&self) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, keyword, business_id, business_name, status, created_at
            FROM geogrid_runs
            WHERE status IN ('queued', 'running')
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list pending runs: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(run_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn set_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE geogrid_runs
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status IS DISTINCT FROM $2
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update run status: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            // Either already in this status or missing
            let exists = sqlx::query("SELECT 1 FROM geogrid_runs WHERE id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            if exists.is_none() {
                return Err(StoreError::RunNotFound(run_id));
            }
            debug!(%run_id, %status, "Run already in status");
            return Ok(());
        }

        debug!(%run_id, %status, "Run status updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_unranked_points(&self, run_id: Uuid) -> Result<Vec<Point>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, lat, lng, rank, measured_at
            FROM geogrid_points
            WHERE run_id = $1 AND rank IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list unranked points: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(point_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn set_point_rank(
        &self,
        point_id: Uuid,
        rank: i32,
        measured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE geogrid_points
            SET rank = $2, measured_at = $3
            WHERE id = $1 AND rank IS NULL
            "#,
        )
        .bind(point_id)
        .bind(rank)
        .bind(measured_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Either already ranked (keep the first measurement) or missing
            let exists = sqlx::query("SELECT 1 FROM geogrid_points WHERE id = $1")
                .bind(point_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            if exists.is_none() {
                return Err(StoreError::PointNotFound(point_id));
            }
            debug!(%point_id, "Point already ranked, keeping first measurement");
        }

        Ok(())
    }
}
