//! Per-connection event rate limiting.
//!
//! DESIGN
//! ======
//! Sliding-window counters in the same shape as the teacher's AI-request
//! limiter (`HashMap<Uuid, VecDeque<Instant>>`, an explicit-timestamp `_at`
//! seam for deterministic tests), retargeted from per-user LLM budgets to
//! per-connection WebSocket throughput: a soft cap on all inbound events,
//! plus a looser bucket for `cursor:moved` alone so mouse tracking doesn't
//! starve other traffic sharing the connection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("connection exceeded {0} events/s")]
    EventRateExceeded(usize),
    #[error("connection exceeded {0} cursor updates/s")]
    CursorRateExceeded(usize),
}

impl crate::frame::ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        "E_RATE_LIMIT"
    }
}

struct ConnectionBuckets {
    events: VecDeque<Instant>,
    cursor: VecDeque<Instant>,
}

impl ConnectionBuckets {
    fn new() -> Self {
        Self { events: VecDeque::new(), cursor: VecDeque::new() }
    }
}

/// One event bucket and one looser cursor bucket per connection (: 60
/// events/s soft cap, ~25/s for `cursor:moved`). A connection that breaches
/// either is disconnected by the caller with `RATE_LIMIT`.
#[derive(Clone)]
pub struct RateLimiter {
    events_per_s: usize,
    cursor_per_s: usize,
    inner: Arc<Mutex<HashMap<Uuid, ConnectionBuckets>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(events_per_s: usize, cursor_per_s: usize) -> Self {
        Self { events_per_s, cursor_per_s, inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Records a non-cursor inbound event for `connection_id`.
    pub fn check_event(&self, connection_id: Uuid) -> Result<(), RateLimitError> {
        self.check_event_at(connection_id, Instant::now())
    }

    fn check_event_at(&self, connection_id: Uuid, now: Instant) -> Result<(), RateLimitError> {
        let mut guard = self.inner.lock().unwrap();
        let buckets = guard.entry(connection_id).or_insert_with(ConnectionBuckets::new());
        prune(&mut buckets.events, now);
        if buckets.events.len() >= self.events_per_s {
            return Err(RateLimitError::EventRateExceeded(self.events_per_s));
        }
        buckets.events.push_back(now);
        Ok(())
    }

    /// Records a `cursor:moved` event, governed by the looser bucket.
    pub fn check_cursor(&self, connection_id: Uuid) -> Result<(), RateLimitError> {
        self.check_cursor_at(connection_id, Instant::now())
    }

    fn check_cursor_at(&self, connection_id: Uuid, now: Instant) -> Result<(), RateLimitError> {
        let mut guard = self.inner.lock().unwrap();
        let buckets = guard.entry(connection_id).or_insert_with(ConnectionBuckets::new());
        prune(&mut buckets.cursor, now);
        if buckets.cursor.len() >= self.cursor_per_s {
            return Err(RateLimitError::CursorRateExceeded(self.cursor_per_s));
        }
        buckets.cursor.push_back(now);
        Ok(())
    }

    /// Drops a connection's counters on disconnect.
    pub fn remove(&self, connection_id: Uuid) {
        self.inner.lock().unwrap().remove(&connection_id);
    }
}

fn prune(deque: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) > WINDOW {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
