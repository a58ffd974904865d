//! Auto-save worker — periodically flushes each active board's cached
//! state to durable storage via optimistic version locking, and writes a
//! full snapshot every Nth successful flush.
//!
//! A `tokio::spawn`ed ticker with `MissedTickBehavior::Delay` so a slow
//! flush doesn't trigger a burst of catch-up ticks. Each tick reads every
//! board with a live cache entry, runs `UPDATE ... WHERE version =
//! $expected`, and on a lost race re-reads the durable row rather than
//! retrying blind. Per-board failures are isolated: one board's conflict
//! or database error never stops the tick from reaching the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::state::{StateCache, StateCacheError};
use crate::metrics::Metrics;
use crate::models::CachedBoardState;
use crate::repository::{BoardRepository, RepositoryError, VersionRepository};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
enum FlushError {
    #[error(transparent)]
    Cache(#[from] StateCacheError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct AutoSaveWorker {
    state_cache: Arc<StateCache>,
    repository: Arc<dyn BoardRepository>,
    versions: Arc<dyn VersionRepository>,
    metrics: Arc<Metrics>,
    interval: Duration,
    snapshot_every_n_saves: u32,
    max_versions_per_board: i64,
    counters: Mutex<HashMap<Uuid, u32>>,
    started: AtomicBool,
}

impl AutoSaveWorker {
    #[must_use]
    pub fn new(state: &AppState) -> Arc<Self> {
        Arc::new(Self {
            state_cache: state.state_cache.clone(),
            repository: state.repository.clone(),
            versions: state.versions.clone(),
            metrics: state.metrics.clone(),
            interval: state.config.auto_save_interval,
            snapshot_every_n_saves: state.config.version_snapshot_every_n_saves,
            max_versions_per_board: state.config.max_versions_per_board,
            counters: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawns the periodic ticker. The task runs until the process exits;
    /// callers that need a clean shutdown should also call `flush_all`
    /// directly rather than relying on this task's next tick.
    ///
    /// A second call on the same worker is a no-op — the ticker is a
    /// singleton per spec, guarded by `started` rather than relying on
    /// callers to invoke this exactly once.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("auto-save worker already started, ignoring duplicate spawn");
            return None;
        }
        let worker = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(worker.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                worker.tick_once().await;
            }
        }))
    }

    /// Step 1: enumerate active boards. This scans the state cache's own
    /// entries rather than presence keys — a board's cache entry outlives
    /// its last user disconnecting, so dirty edits left behind after
    /// everyone leaves still get flushed on schedule and at shutdown
    /// instead of silently going unsaved.
    async fn tick_once(&self) {
        let board_ids = match self.state_cache.active_board_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "auto-save tick could not enumerate active boards");
                return;
            }
        };
        for board_id in board_ids {
            if let Err(err) = self.flush_board(board_id).await {
                warn!(%board_id, %err, "auto-save flush failed for board");
            }
        }
    }

    /// One board's flush: load, `update_with_version`, reconcile. A lost
    /// optimistic race is not an error — it self-heals by re-reading the
    /// durable row and resetting the snapshot counter.
    async fn flush_board(&self, board_id: Uuid) -> Result<(), FlushError> {
        let Some(mut cached) = self.state_cache.get_state(board_id).await? else {
            return Ok(());
        };

        let rows = self.repository.update_with_version(board_id, &cached.objects, cached.postgres_version).await?;

        if rows == 0 {
            self.metrics.incr("autosave_conflict_total");
            if let Some(board) = self.repository.find_by_id(board_id).await? {
                let fresh = CachedBoardState::new(board.objects, board.version);
                self.state_cache.set_state(board_id, &fresh).await?;
            }
            self.counters.lock().await.insert(board_id, 0);
            return Ok(());
        }

        self.metrics.incr("autosave_success_total");
        cached.postgres_version += 1;
        cached.last_synced_at = chrono::Utc::now();
        self.state_cache.set_state(board_id, &cached).await?;

        let due_for_snapshot = {
            let mut counters = self.counters.lock().await;
            let count = counters.entry(board_id).or_insert(0);
            *count += 1;
            let due = *count >= self.snapshot_every_n_saves;
            if due {
                *count = 0;
            }
            due
        };

        if due_for_snapshot && !cached.objects.is_empty() {
            if let Err(err) =
                self.versions.create_snapshot(board_id, Uuid::nil(), &cached.objects, self.max_versions_per_board).await
            {
                warn!(%board_id, %err, "version snapshot failed");
            }
        }

        Ok(())
    }

    /// One final synchronous flush, called on graceful shutdown.
    pub async fn flush_all(&self) {
        let board_ids = match self.state_cache.active_board_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "shutdown flush could not enumerate active boards");
                return;
            }
        };
        info!(count = board_ids.len(), "flushing active boards before shutdown");
        for board_id in board_ids {
            if let Err(err) = self.flush_board(board_id).await {
                warn!(%board_id, %err, "shutdown flush failed for board");
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
