//! Chat history — interface-only per spec scope. Per
//! (board_id, user_id) FIFO capped at `CHAT_HISTORY_LIMIT`, TTL
//! `CHAT_HISTORY_TTL_S`. Losses tolerated on cache outage (fail-open,).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CacheError, KvBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

fn chat_key(board_id: Uuid, user_id: Uuid) -> String {
    format!("chat:{board_id}:{user_id}")
}

pub struct ChatHistory {
    backend: Arc<dyn KvBackend>,
    limit: usize,
    ttl: Duration,
}

impl ChatHistory {
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>, limit: usize, ttl: Duration) -> Self {
        Self { backend, limit, ttl }
    }

    /// `append`: pushes, then trims to the configured window.
    /// Failures are swallowed — chat history is best-effort.
    pub async fn append(&self, board_id: Uuid, user_id: Uuid, message: &ChatMessage) {
        let key = chat_key(board_id, user_id);
        let Ok(raw) = serde_json::to_string(message) else { return };
        if self.backend.rpush(&key, &raw).await.is_err() {
            return;
        }
        #[allow(clippy::cast_possible_wrap)]
        let start = -(self.limit as isize);
        let _ = self.backend.ltrim(&key, start, -1).await;
        let _ = self.backend.expire(&key, self.ttl).await;
    }

    pub async fn get(&self, board_id: Uuid, user_id: Uuid) -> Vec<ChatMessage> {
        let key = chat_key(board_id, user_id);
        let Ok(raw) = self.backend.lrange(&key, 0, -1).await else { return Vec::new() };
        raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect()
    }

    pub async fn purge(&self, board_id: Uuid, user_id: Uuid) {
        let _ = self.backend.del(&chat_key(board_id, user_id)).await;
    }

    pub async fn purge_all(&self, board_id: Uuid, user_ids: &[Uuid]) {
        for user_id in user_ids {
            self.purge(board_id, *user_id).await;
        }
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
