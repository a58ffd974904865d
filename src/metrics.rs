//! In-process metrics sink.
//!
//! DESIGN
//! ======
//! No metrics crate appears anywhere in the reference corpus, so this
//! follows the shape the corpus already uses for other in-process
//! counters — `rate_limit.rs`'s `Arc<Mutex<HashMap<...>>>` — rather than
//! reaching for an external one. Counters are `u64`s keyed by a label
//! string; histograms keep a running count/sum per label, enough for a
//! mean without pulling in a bucketing dependency. No HTTP scrape
//! endpoint; reading `snapshot` is the only consumer today (health
//! checks, tests).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct HistogramStats {
    pub count: u64,
    pub sum_ms: f64,
}

impl HistogramStats {
    #[must_use]
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum_ms / self.count as f64 }
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, i64>,
    histograms: HashMap<String, HistogramStats>,
}

/// Process-wide metrics sink: `ws_event_total{event}`,
/// `db_query_total{model,op}`, `redis_op_total{op}`, `connections_active`,
/// `edit_locks_active`, and `db_latency_ms{model,op}`.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: std::sync::Arc<Mutex<MetricsInner>>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, label: &str) {
        self.incr_by(label, 1);
    }

    pub fn incr_by(&self, label: &str, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.counters.entry(label.to_owned()).or_insert(0) += n;
    }

    pub fn set_gauge(&self, label: &str, value: i64) {
        self.inner.lock().unwrap().gauges.insert(label.to_owned(), value);
    }

    pub fn incr_gauge(&self, label: &str, delta: i64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.gauges.entry(label.to_owned()).or_insert(0) += delta;
    }

    pub fn observe(&self, label: &str, value_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        let stats = inner.histograms.entry(label.to_owned()).or_default();
        stats.count += 1;
        stats.sum_ms += value_ms;
    }

    #[must_use]
    pub fn counter(&self, label: &str) -> u64 {
        self.inner.lock().unwrap().counters.get(label).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn gauge(&self, label: &str) -> i64 {
        self.inner.lock().unwrap().gauges.get(label).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn histogram(&self, label: &str) -> HistogramStats {
        self.inner.lock().unwrap().histograms.get(label).copied().unwrap_or_default()
    }

    /// `ws_event_total{event}`: one counter per syscall prefix.
    pub fn record_ws_event(&self, event: &str) {
        self.incr(&format!("ws_event_total{{event={event}}}"));
    }

    /// `db_query_total{model,op}` + `db_latency_ms{model,op}`.
    pub fn record_db_query(&self, model: &str, op: &str, latency_ms: f64) {
        self.incr(&format!("db_query_total{{model={model},op={op}}}"));
        self.observe(&format!("db_latency_ms{{model={model},op={op}}}"), latency_ms);
    }

    /// `redis_op_total{op}`.
    pub fn record_redis_op(&self, op: &str) {
        self.incr(&format!("redis_op_total{{op={op}}}"));
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
