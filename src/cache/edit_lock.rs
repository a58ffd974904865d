//! Edit-lock registry — one exclusive claim per (board, object),
//! TTL `EDIT_LOCK_TTL_S`, used for conflict warnings, not real mutual
//! exclusion (LWW still governs the actual write).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{CacheError, KvBackend};
use crate::metrics::Metrics;
use crate::models::EditLock;

fn lock_key(board_id: Uuid, object_id: Uuid) -> String {
    format!("edit:{board_id}:{object_id}")
}

/// Outcome of a `start_edit` attempt.
pub enum EditStartOutcome {
    /// Lock was vacant or already held by this user; claimed/refreshed.
    Claimed(EditLock),
    /// Held by a different user; existing lock is returned for the warning.
    Conflict(EditLock),
}

pub struct EditLockRegistry {
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
    metrics: Arc<Metrics>,
}

impl EditLockRegistry {
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self { backend, ttl, metrics }
    }

    /// `start_edit`: claims a vacant lock, refreshes one already
    /// held by `user_id`, or reports a conflict with the existing holder.
    pub async fn start_edit(
        &self,
        board_id: Uuid,
        object_id: Uuid,
        user_id: Uuid,
        user_name: &str,
    ) -> Result<EditStartOutcome, CacheError> {
        let key = lock_key(board_id, object_id);
        if let Some(raw) = self.backend.get(&key).await? {
            let existing: EditLock = serde_json::from_str(&raw).map_err(CacheError::from)?;
            if existing.user_id == user_id {
                self.backend.expire(&key, self.ttl).await?;
                return Ok(EditStartOutcome::Claimed(existing));
            }
            return Ok(EditStartOutcome::Conflict(existing));
        }

        let lock = EditLock { board_id, object_id, user_id, user_name: user_name.to_owned(), started_at: Utc::now() };
        let raw = serde_json::to_string(&lock).map_err(CacheError::from)?;
        self.backend.set(&key, &raw, Some(self.ttl)).await?;
        self.metrics.incr_gauge("edit_locks_active", 1);
        Ok(EditStartOutcome::Claimed(lock))
    }

    /// `end_edit`: clears only when `user_id` is the current holder.
    pub async fn end_edit(&self, board_id: Uuid, object_id: Uuid, user_id: Uuid) -> Result<bool, CacheError> {
        let key = lock_key(board_id, object_id);
        let Some(raw) = self.backend.get(&key).await? else { return Ok(false) };
        let existing: EditLock = serde_json::from_str(&raw).map_err(CacheError::from)?;
        if existing.user_id != user_id {
            return Ok(false);
        }
        self.backend.del(&key).await?;
        self.metrics.incr_gauge("edit_locks_active", -1);
        Ok(true)
    }

    /// `clear_user_edits`: used on disconnect.
    pub async fn clear_user_edits(&self, board_id: Uuid, user_id: Uuid) -> Result<(), CacheError> {
        let pattern = format!("edit:{board_id}:*");
        for key in self.backend.keys(&pattern).await? {
            if let Some(raw) = self.backend.get(&key).await? {
                if let Ok(lock) = serde_json::from_str::<EditLock>(&raw) {
                    if lock.user_id == user_id {
                        self.backend.del(&key).await?;
                        self.metrics.incr_gauge("edit_locks_active", -1);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "edit_lock_test.rs"]
mod tests;
