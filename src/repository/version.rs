//! Version snapshot service — immutable full-object snapshots,
//! trimmed to a retention window.
//!
//! DESIGN
//! ======
//! Grounded on the teacher's `services/savepoint.rs` (`create_savepoint`,
//! row-to-json helpers), generalized from the teacher's seq/debounce model
//! to spec's "insert then trim oldest over retention" model: no debounce,
//! called only from the auto-save tick's every-Nth-save cadence.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::{BoardObject, BoardVersion};

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for VersionError {
    fn error_code(&self) -> &'static str {
        "E_DATABASE"
    }

    fn retryable(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// Insert a snapshot row, then trim the oldest rows beyond
    /// `max_versions_per_board`. Best-effort: callers log-and-swallow
    /// failures (,) rather than aborting the auto-save tick.
    async fn create_snapshot(
        &self,
        board_id: Uuid,
        created_by: Uuid,
        snapshot_objects: &[BoardObject],
        max_versions_per_board: i64,
    ) -> Result<BoardVersion, VersionError>;

    async fn list_versions(&self, board_id: Uuid) -> Result<Vec<BoardVersion>, VersionError>;
}

pub struct PgVersionRepository {
    pool: sqlx::PgPool,
    metrics: Arc<Metrics>,
}

impl PgVersionRepository {
    #[must_use]
    pub fn new(pool: sqlx::PgPool, metrics: Arc<Metrics>) -> Self {
        Self { pool, metrics }
    }

    fn record(&self, op: &str, started: Instant) {
        self.metrics.record_db_query("board_version", op, started.elapsed().as_secs_f64() * 1000.0);
    }
}

#[async_trait]
impl VersionRepository for PgVersionRepository {
    async fn create_snapshot(
        &self,
        board_id: Uuid,
        created_by: Uuid,
        snapshot_objects: &[BoardObject],
        max_versions_per_board: i64,
    ) -> Result<BoardVersion, VersionError> {
        let version = BoardVersion {
            id: Uuid::new_v4(),
            board_id,
            snapshot: snapshot_objects.to_vec(),
            created_by,
            created_at: Utc::now(),
        };
        let snapshot_json = serde_json::to_value(&version.snapshot).unwrap_or_else(|_| serde_json::json!([]));

        let started = Instant::now();
        sqlx::query(
            "INSERT INTO board_versions (id, board_id, snapshot, created_by, created_at) \
            VALUES ($1, $2, $3, $4, $5)",
        ).bind(version.id).bind(version.board_id).bind(&snapshot_json).bind(version.created_by).bind(version.created_at).execute(&self.pool).await?;
        self.record("create_snapshot_insert", started);

        let started = Instant::now();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM board_versions WHERE board_id = $1").bind(board_id).fetch_one(&self.pool).await?;
        self.record("create_snapshot_count", started);

        if count > max_versions_per_board {
            let excess = count - max_versions_per_board;
            let started = Instant::now();
            sqlx::query(
                "DELETE FROM board_versions WHERE id IN ( \
                SELECT id FROM board_versions WHERE board_id = $1 \
                ORDER BY created_at ASC LIMIT $2 \
                )",
            ).bind(board_id).bind(excess).execute(&self.pool).await?;
            self.record("create_snapshot_trim", started);
        }

        Ok(version)
    }

    async fn list_versions(&self, board_id: Uuid) -> Result<Vec<BoardVersion>, VersionError> {
        let started = Instant::now();
        let rows = sqlx::query_as::<_, (Uuid, Uuid, serde_json::Value, Uuid, chrono::DateTime<Utc>)>(
            "SELECT id, board_id, snapshot, created_by, created_at \
            FROM board_versions WHERE board_id = $1 ORDER BY created_at DESC",
        ).bind(board_id).fetch_all(&self.pool).await?;
        self.record("list_versions", started);

        Ok(rows.into_iter().map(|(id, board_id, snapshot, created_by, created_at)| BoardVersion {
            id,
            board_id,
            snapshot: serde_json::from_value(snapshot).unwrap_or_default(),
            created_by,
            created_at,
        }).collect())
    }
}


#[cfg(test)]
#[path = "version_test.rs"]
mod tests;
