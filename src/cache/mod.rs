//! Shared-state cache — the external key-value store backing C2 (cached
//! board state), C3 (presence/session), C4 (edit locks), and C10 (chat
//! history).
//!
//! DESIGN
//! ======
//! A thin `KvBackend` trait sits between the spec's key layout and the
//! wire protocol, grounded on the `CacheService`-style free functions in the
//! corpus's Redis example (`redis::cmd(...).query_async`) rather than the
//! teacher's in-memory `AppState` maps — the teacher never talks to an
//! external cache, so this is the part of the system most directly
//! "enriched from the rest of the pack" (see SPEC_FULL.md-C4).
//!
//! Two implementations: `RedisBackend` for production, `MemoryBackend` for
//! tests that shouldn't need a live Redis. Both obey the same TTL and
//! pattern-scan contract.

pub mod chat;
pub mod edit_lock;
pub mod presence;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cached value was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Primitive key-value operations needed by the cache-backed components.
/// Mirrors the Redis commands each component's key layout requires:
/// plain GET/SET with TTL for state/presence/session/edit-lock records, a
/// per-user board set for O(1) `remove_user_from_all_boards`, and a capped
/// list for chat history.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<(), CacheError>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Production backend: a shared `redis::aio::ConnectionManager`, cloned per
/// call per the `CacheService` pattern (cloning a `ConnectionManager` is
/// cheap — it shares the underlying multiplexed connection).
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        #[allow(clippy::cast_possible_wrap)]
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

/// Wraps any `KvBackend` and records a `redis_op_total{op}` counter per
/// call, so the Redis-shaped operations stay countable regardless of which
/// concrete backend (Redis in production, the in-memory stand-in in tests)
/// is underneath.
pub struct MeteredBackend {
    inner: Arc<dyn KvBackend>,
    metrics: Arc<Metrics>,
}

impl MeteredBackend {
    #[must_use]
    pub fn new(inner: Arc<dyn KvBackend>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl KvBackend for MeteredBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.metrics.record_redis_op("get");
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.metrics.record_redis_op("set");
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.metrics.record_redis_op("del");
        self.inner.del(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.metrics.record_redis_op("keys");
        self.inner.keys(pattern).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.metrics.record_redis_op("sadd");
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.metrics.record_redis_op("srem");
        self.inner.srem(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.metrics.record_redis_op("smembers");
        self.inner.smembers(key).await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.metrics.record_redis_op("rpush");
        self.inner.rpush(key, value).await
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.metrics.record_redis_op("ltrim");
        self.inner.ltrim(key, start, stop).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        self.metrics.record_redis_op("lrange");
        self.inner.lrange(key, start, stop).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.metrics.record_redis_op("expire");
        self.inner.expire(key, ttl).await
    }
}

#[cfg(test)]
pub use memory::MemoryBackend;
