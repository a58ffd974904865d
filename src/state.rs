//! Shared application state, injected into the connection handler and the
//! auto-save worker.
//!
//! DESIGN
//! ======
//! Mirrors the teacher's `AppState` (a `#[derive(Clone)]` struct of
//! `Arc`-wrapped collaborators injected via Axum's `State` extractor), but
//! holds the spec's actual collaborators instead of the teacher's in-memory
//! board map: the hub registry, the Redis-backed presence/edit-lock/
//! state-cache/chat registries (-C4, C10), the repository/version
//! services (, C8), the rate limiter and metrics sink (, C11), and
//! the identity provider boundary.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::auth::IdentityProvider;
use crate::cache::chat::ChatHistory;
use crate::cache::edit_lock::EditLockRegistry;
use crate::cache::presence::PresenceRegistry;
use crate::cache::state::StateCache;
use crate::config::Config;
use crate::connection::rate_limit::RateLimiter;
use crate::hub::{HubDeps, HubRegistry};
use crate::metrics::Metrics;
use crate::repository::{BoardRepository, VersionRepository};

/// Tracks which connection is currently authenticated as a given user, so a
/// second login can close the first.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_user: Mutex<HashMap<Uuid, (Uuid, mpsc::Sender<()>)>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection_id` as the active connection for `user_id`.
    /// Returns this connection's kill-switch receiver (fired if a later
    /// connection supersedes it) and, if another connection already held
    /// the slot, that connection's kill-switch sender — the caller fires it
    /// to close the old connection with `DUPLICATE_SESSION`.
    pub async fn claim(&self, user_id: Uuid, connection_id: Uuid) -> (mpsc::Receiver<()>, Option<mpsc::Sender<()>>) {
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let mut guard = self.by_user.lock().await;
        let previous = guard.insert(user_id, (connection_id, kill_tx)).map(|(_, tx)| tx);
        (kill_rx, previous)
    }

    /// Releases the slot, but only if `connection_id` still owns it (a
    /// stale disconnect from an already-superseded connection must not
    /// clobber the new one's registration).
    pub async fn release(&self, user_id: Uuid, connection_id: Uuid) {
        let mut guard = self.by_user.lock().await;
        if let Some((owner, _)) = guard.get(&user_id) {
            if *owner == connection_id {
                guard.remove(&user_id);
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hubs: Arc<HubRegistry>,
    pub presence: Arc<PresenceRegistry>,
    pub edit_locks: Arc<EditLockRegistry>,
    pub state_cache: Arc<StateCache>,
    pub chat: Arc<ChatHistory>,
    pub repository: Arc<dyn BoardRepository>,
    pub versions: Arc<dyn VersionRepository>,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: RateLimiter,
    pub identity: Arc<dyn IdentityProvider>,
    pub connections: Arc<ConnectionRegistry>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        backend: Arc<dyn crate::cache::KvBackend>,
        repository: Arc<dyn BoardRepository>,
        versions: Arc<dyn VersionRepository>,
        identity: Arc<dyn IdentityProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let config = Arc::new(config);
        let backend: Arc<dyn crate::cache::KvBackend> =
            Arc::new(crate::cache::MeteredBackend::new(backend, metrics.clone()));
        let state_cache = Arc::new(StateCache::new(backend.clone()));
        let presence = Arc::new(PresenceRegistry::new(backend.clone(), config.presence_ttl, config.session_ttl));
        let edit_locks = Arc::new(EditLockRegistry::new(backend.clone(), config.edit_lock_ttl, metrics.clone()));
        let chat = Arc::new(ChatHistory::new(backend, config.chat_history_limit, config.chat_history_ttl));

        let hub_deps = HubDeps {
            state_cache: state_cache.clone(),
            presence: presence.clone(),
            edit_locks: edit_locks.clone(),
            repository: repository.clone(),
            metrics: metrics.clone(),
            max_objects_per_board: config.max_objects_per_board,
            max_batch_size: config.max_batch_size,
        };

        Self {
            hubs: HubRegistry::new(hub_deps),
            presence,
            edit_locks,
            state_cache,
            chat,
            repository,
            versions,
            metrics,
            rate_limiter: RateLimiter::new(config.rate_limit_events_per_s, config.cursor_rate_limit_per_s),
            identity,
            connections: Arc::new(ConnectionRegistry::new()),
            config,
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
