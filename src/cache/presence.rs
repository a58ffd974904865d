//! Presence & session registry.
//!
//! Key layout : `presence:{board_id}:{user_id}` (TTL `PRESENCE_TTL_S`)
//! and `ws:session:{connection_id}` (TTL `SESSION_TTL_S`). A secondary
//! `presence:user:{user_id}` set of board ids is maintained alongside the
//! scalar keys so `remove_user_from_all_boards` is an O(1) set read instead
//! of the pattern scan the Open Question in spec flags as O(N) (resolved
//! in SPEC_FULL.md/C4 and DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::{CacheError, KvBackend};
use crate::models::{PresenceRecord, Session};

fn presence_key(board_id: Uuid, user_id: Uuid) -> String {
    format!("presence:{board_id}:{user_id}")
}

fn user_boards_key(user_id: Uuid) -> String {
    format!("presence:user:{user_id}")
}

fn session_key(connection_id: Uuid) -> String {
    format!("ws:session:{connection_id}")
}

pub struct PresenceRegistry {
    backend: Arc<dyn KvBackend>,
    presence_ttl: Duration,
    session_ttl: Duration,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>, presence_ttl: Duration, session_ttl: Duration) -> Self {
        Self { backend, presence_ttl, session_ttl }
    }

    /// `add_user`: records presence and refreshes the per-user
    /// board set.
    pub async fn add_user(&self, record: &PresenceRecord) -> Result<(), CacheError> {
        let raw = serde_json::to_string(record).map_err(CacheError::from)?;
        self.backend.set(&presence_key(record.board_id, record.user_id), &raw, Some(self.presence_ttl)).await?;
        self.backend.sadd(&user_boards_key(record.user_id), &record.board_id.to_string()).await?;
        Ok(())
    }

    /// `refresh`: a heartbeat extends the TTL without altering the
    /// record's content.
    pub async fn refresh(&self, board_id: Uuid, user_id: Uuid) -> Result<bool, CacheError> {
        let key = presence_key(board_id, user_id);
        if self.backend.get(&key).await?.is_none() {
            return Ok(false);
        }
        self.backend.expire(&key, self.presence_ttl).await?;
        Ok(true)
    }

    pub async fn remove_user(&self, board_id: Uuid, user_id: Uuid) -> Result<(), CacheError> {
        self.backend.del(&presence_key(board_id, user_id)).await?;
        self.backend.srem(&user_boards_key(user_id), &board_id.to_string()).await?;
        Ok(())
    }

    pub async fn list_users(&self, board_id: Uuid) -> Result<Vec<PresenceRecord>, CacheError> {
        let pattern = format!("presence:{board_id}:*");
        let keys = self.backend.keys(&pattern).await?;
        let mut users = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.backend.get(&key).await? {
                if let Ok(record) = serde_json::from_str::<PresenceRecord>(&raw) {
                    users.push(record);
                }
            }
        }
        Ok(users)
    }

    /// `remove_user_from_all_boards`: used on disconnect. Returns
    /// the set of board ids the user was present on so the caller can
    /// broadcast `user:left` to each (invariant 5,).
    pub async fn remove_user_from_all_boards(&self, user_id: Uuid) -> Result<Vec<Uuid>, CacheError> {
        let user_key = user_boards_key(user_id);
        let board_ids = self.backend.smembers(&user_key).await?;
        let mut removed = Vec::with_capacity(board_ids.len());
        for raw_id in board_ids {
            let Ok(board_id) = raw_id.parse::<Uuid>() else { continue };
            self.backend.del(&presence_key(board_id, user_id)).await?;
            removed.push(board_id);
        }
        self.backend.del(&user_key).await?;
        Ok(removed)
    }

    pub async fn put_session(&self, session: &Session) -> Result<(), CacheError> {
        let raw = serde_json::to_string(session).map_err(CacheError::from)?;
        self.backend.set(&session_key(session.connection_id), &raw, Some(self.session_ttl)).await?;
        Ok(())
    }

    pub async fn get_session(&self, connection_id: Uuid) -> Result<Option<Session>, CacheError> {
        let Some(raw) = self.backend.get(&session_key(connection_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw).map_err(CacheError::from)?))
    }

    pub async fn remove_session(&self, connection_id: Uuid) -> Result<(), CacheError> {
        self.backend.del(&session_key(connection_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
