//! Board, and the live/durable records that track it: cached state,
//! presence, sessions, edit locks, and version snapshots.
//!
//! DESIGN
//! ======
//! `Board` is the durable row; `CachedBoardState` is the hub's live
//! working copy, kept in the external cache between auto-save flushes.
//! The rest are TTL-bounded shared records written by the presence/edit-lock
//! registries (,).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::object::BoardObject;

/// A durable board row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub slot: i32,
    pub version: i32,
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<u8>>,
    pub thumbnail_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_updated_at: Option<DateTime<Utc>>,
    pub objects: Vec<BoardObject>,
}

/// The hub's live working copy of a board, mirrored into the cache.
///
/// `postgres_version` tracks the durable `boards.version` this copy was
/// last reconciled against; `update_with_version` uses it as the optimistic
/// expected value on every auto-save flush (,).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedBoardState {
    pub objects: Vec<BoardObject>,
    pub postgres_version: i32,
    pub last_synced_at: DateTime<Utc>,
}

impl CachedBoardState {
    #[must_use]
    pub fn new(objects: Vec<BoardObject>, postgres_version: i32) -> Self {
        Self { objects, postgres_version, last_synced_at: Utc::now() }
    }

    #[must_use]
    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.objects.iter().position(|o| o.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.index_of(id).is_some()
    }
}

/// A user's live presence on a board. TTL 30s (`PRESENCE_TTL_S`), refreshed
/// by `heartbeat` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub board_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub color: String,
    pub last_heartbeat: DateTime<Utc>,
}

/// A connection's session record. TTL 24h.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
}

/// An exclusive, short-TTL claim on one object for conflict warnings.
/// TTL 5 minutes (`EDIT_LOCK_TTL_S`), refreshed by re-selection from the
/// same user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditLock {
    pub board_id: Uuid,
    pub object_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub started_at: DateTime<Utc>,
}

/// An immutable full-object snapshot of a board, written by the version
/// snapshot service every `VERSION_SNAPSHOT_EVERY_N_SAVES` flushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardVersion {
    pub id: Uuid,
    pub board_id: Uuid,
    pub snapshot: Vec<BoardObject>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}
