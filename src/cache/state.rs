//! Cached board state — the JSON-encoded `CachedBoardState` behind
//! `board:{board_id}:state`.
//!
//! Mutations to the objects array are NOT made through this store: they
//! happen in-memory inside the board hub (the sole writer for a given
//! board) and are mirrored here as whole-value GET/SET. That keeps this
//! type a thin key-value wrapper instead of a second place that needs its
//! own atomicity story.

use std::sync::Arc;

use uuid::Uuid;

use super::{CacheError, KvBackend};
use crate::models::CachedBoardState;
use crate::repository::board::{BoardRepository, RepositoryError};

fn state_key(board_id: Uuid) -> String {
    format!("board:{board_id}:state")
}

#[derive(Debug, thiserror::Error)]
pub enum StateCacheError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct StateCache {
    backend: Arc<dyn KvBackend>,
}

impl StateCache {
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Returns `None` on a MISS — the caller must `load_from_durable` then
    /// retry.
    pub async fn get_state(&self, board_id: Uuid) -> Result<Option<CachedBoardState>, StateCacheError> {
        let Some(raw) = self.backend.get(&state_key(board_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw).map_err(CacheError::from)?))
    }

    pub async fn set_state(&self, board_id: Uuid, state: &CachedBoardState) -> Result<(), StateCacheError> {
        let raw = serde_json::to_string(state).map_err(CacheError::from)?;
        self.backend.set(&state_key(board_id), &raw, None).await?;
        Ok(())
    }

    /// Cold-load: read the durable board row, write it into the cache, and
    /// return it.
    pub async fn load_from_durable(
        &self,
        board_id: Uuid,
        repo: &dyn BoardRepository,
    ) -> Result<CachedBoardState, StateCacheError> {
        let board = repo.find_by_id(board_id).await?.ok_or(RepositoryError::NotFound(board_id))?;
        let state = CachedBoardState::new(board.objects, board.version);
        self.set_state(board_id, &state).await?;
        Ok(state)
    }

    /// Drops a board's cache entry entirely, as opposed to the hub's own
    /// idle-retire (which only drops the in-process hub task and leaves
    /// this entry in place so a quick rejoin still hits a warm cache). Used
    /// when a board is deleted and its cached state must not outlive it.
    pub async fn evict(&self, board_id: Uuid) -> Result<(), StateCacheError> {
        self.backend.del(&state_key(board_id)).await?;
        Ok(())
    }

    /// Board ids with a live cache entry, deduped. The auto-save worker
    /// enumerates boards this way rather than via presence keys: a board's
    /// cache entry outlives its last user leaving (it is only dropped by
    /// `evict`, never by TTL), so a board with dirty edits sitting in the
    /// cache after everyone has disconnected still gets flushed on the next
    /// tick and at shutdown, matching the "idle-stopped ... after auto-save
    /// worker has completed its final flush for that board" requirement.
    pub async fn active_board_ids(&self) -> Result<Vec<Uuid>, StateCacheError> {
        let keys = self.backend.keys("board:*:state").await?;
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let mut parts = key.splitn(3, ':');
            let _prefix = parts.next();
            let Some(middle) = parts.next() else { continue };
            if let Ok(board_id) = middle.parse::<Uuid>() {
                ids.push(board_id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
