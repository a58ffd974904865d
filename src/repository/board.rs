//! Board repository — typed access to durable board rows, and the
//! sole optimistic-locked write path auto-save uses.
//!
//! DESIGN
//! ======
//! Grounded on the teacher's `services/board.rs` (hydrate/flush shape) and
//! `db/mod.rs` (pool construction), generalized from the teacher's
//! unversioned row rewrite to spec's `update_with_version`: a single
//! `UPDATE... WHERE version = $expected` whose `rows_affected` tells the
//! caller whether it won or lost the race, never a row lock held across
//! requests.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::{Board, BoardObject};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("board not found: {0}")]
    NotFound(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for RepositoryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Transient(_) => "E_TRANSIENT",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Map a raw sqlx error onto the spec's failure taxonomy: lost
/// connections are retriable, unique-constraint violations are `CONFLICT`.
fn classify(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            RepositoryError::Transient(e.to_string())
        }
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Conflict(e.to_string()),
        _ => RepositoryError::Database(e),
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoardFilter {
    pub owner_id: Option<Uuid>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BoardPatch {
    pub title: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub is_deleted: Option<bool>,
}

#[async_trait]
pub trait BoardRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Board>, RepositoryError>;
    async fn find_many(&self, filter: BoardFilter) -> Result<Vec<Board>, RepositoryError>;
    async fn create(&self, owner_id: Uuid, title: &str, slot: i32, objects: Vec<BoardObject>) -> Result<Board, RepositoryError>;

    /// Full rewrite for title rename, thumbnail update, soft-delete. Does
    /// NOT touch `version`.
    async fn update(&self, id: Uuid, patch: BoardPatch) -> Result<(), RepositoryError>;

    /// The sole auto-save write path (,): `UPDATE boards SET
    /// objects = $json, version = version + 1, updated_at = now() WHERE id
    /// = $id AND version = $expected`. Returns rows affected (0 or 1).
    async fn update_with_version(
        &self,
        id: Uuid,
        objects: &[BoardObject],
        expected_version: i32,
    ) -> Result<u64, RepositoryError>;
}

pub struct PgBoardRepository {
    pool: sqlx::PgPool,
    metrics: Arc<Metrics>,
}

impl PgBoardRepository {
    #[must_use]
    pub fn new(pool: sqlx::PgPool, metrics: Arc<Metrics>) -> Self {
        Self { pool, metrics }
    }

    fn record(&self, op: &str, started: Instant) {
        self.metrics.record_db_query("board", op, started.elapsed().as_secs_f64() * 1000.0);
    }
}

#[derive(sqlx::FromRow)]
struct BoardRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    slot: i32,
    version: i32,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    last_accessed_at: DateTime<Utc>,
    thumbnail: Option<Vec<u8>>,
    thumbnail_version: i32,
    thumbnail_updated_at: Option<DateTime<Utc>>,
    objects: serde_json::Value,
}

impl TryFrom<BoardRow> for Board {
    type Error = serde_json::Error;

    fn try_from(row: BoardRow) -> Result<Self, Self::Error> {
        let objects: Vec<BoardObject> = serde_json::from_value(row.objects)?;
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            slot: row.slot,
            version: row.version,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            last_accessed_at: row.last_accessed_at,
            thumbnail: row.thumbnail,
            thumbnail_version: row.thumbnail_version,
            thumbnail_updated_at: row.thumbnail_updated_at,
            objects,
        })
    }
}

#[async_trait]
impl BoardRepository for PgBoardRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Board>, RepositoryError> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, BoardRow>(
            "SELECT id, owner_id, title, slot, version, is_deleted, deleted_at, last_accessed_at, \
            thumbnail, thumbnail_version, thumbnail_updated_at, objects \
            FROM boards WHERE id = $1",
        ).bind(id).fetch_optional(&self.pool).await.map_err(classify)?;
        self.record("find_by_id", started);

        row.map(Board::try_from).transpose().map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))
    }

    async fn find_many(&self, filter: BoardFilter) -> Result<Vec<Board>, RepositoryError> {
        let started = Instant::now();
        let rows = sqlx::query_as::<_, BoardRow>(
            "SELECT id, owner_id, title, slot, version, is_deleted, deleted_at, last_accessed_at, \
            thumbnail, thumbnail_version, thumbnail_updated_at, objects \
            FROM boards \
            WHERE ($1::uuid IS NULL OR owner_id = $1) AND ($2 OR NOT is_deleted) \
            ORDER BY last_accessed_at DESC",
        ).bind(filter.owner_id).bind(filter.include_deleted).fetch_all(&self.pool).await.map_err(classify)?;
        self.record("find_many", started);

        rows.into_iter().map(Board::try_from).collect::<Result<Vec<_>, _>>().map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))
    }

    async fn create(&self, owner_id: Uuid, title: &str, slot: i32, objects: Vec<BoardObject>) -> Result<Board, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let json = serde_json::to_value(&objects).map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))?;

        let started = Instant::now();
        sqlx::query(
            "INSERT INTO boards (id, owner_id, title, slot, version, is_deleted, last_accessed_at, \
            thumbnail_version, objects) \
            VALUES ($1, $2, $3, $4, 0, false, $5, 0, $6)",
        ).bind(id).bind(owner_id).bind(title).bind(slot).bind(now).bind(json).execute(&self.pool).await.map_err(classify)?;
        self.record("create", started);

        Ok(Board {
            id,
            owner_id,
            title: title.to_owned(),
            slot,
            version: 0,
            is_deleted: false,
            deleted_at: None,
            last_accessed_at: now,
            thumbnail: None,
            thumbnail_version: 0,
            thumbnail_updated_at: None,
            objects,
        })
    }

    async fn update(&self, id: Uuid, patch: BoardPatch) -> Result<(), RepositoryError> {
        let started = Instant::now();
        let result = sqlx::query(
            "UPDATE boards SET \
            title = COALESCE($2, title), \
            thumbnail = COALESCE($3, thumbnail), \
            thumbnail_version = CASE WHEN $3 IS NOT NULL THEN thumbnail_version + 1 ELSE thumbnail_version END, \
            thumbnail_updated_at = CASE WHEN $3 IS NOT NULL THEN now() ELSE thumbnail_updated_at END, \
            is_deleted = COALESCE($4, is_deleted), \
            deleted_at = CASE WHEN $4 = true THEN now() WHEN $4 = false THEN NULL ELSE deleted_at END \
            WHERE id = $1",
        ).bind(id).bind(patch.title).bind(patch.thumbnail).bind(patch.is_deleted).execute(&self.pool).await.map_err(classify)?;
        self.record("update", started);

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn update_with_version(
        &self,
        id: Uuid,
        objects: &[BoardObject],
        expected_version: i32,
    ) -> Result<u64, RepositoryError> {
        let json = serde_json::to_value(objects).map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let started = Instant::now();
        let result = sqlx::query(
            "UPDATE boards SET objects = $1, version = version + 1, updated_at = now() \
            WHERE id = $2 AND version = $3",
        ).bind(json).bind(id).bind(expected_version).execute(&self.pool).await.map_err(classify)?;
        self.record("update_with_version", started);

        Ok(result.rows_affected())
    }
}


#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
