//! Aggregated connection metrics for one resilient client.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters for one URL path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of a client's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_retries: u64,
    pub avg_latency_ms: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub per_endpoint: BTreeMap<String, EndpointMetrics>,
}

impl ConnectionMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.total_requests as f64
    }
}

/// Shared, lock-protected metrics recorder. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    inner: Arc<Mutex<ConnectionMetrics>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionMetrics> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned metrics mutex");
            poisoned.into_inner()
        })
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration) {
        let now = Utc::now();
        let mut m = self.lock();
        record_terminal(&mut m, endpoint, latency, now, true);
        m.success_count += 1;
        m.last_success_at = Some(now);
        m.consecutive_failures = 0;
    }

    pub fn record_failure(&self, endpoint: &str, latency: Duration) {
        let now = Utc::now();
        let mut m = self.lock();
        record_terminal(&mut m, endpoint, latency, now, false);
        m.failure_count += 1;
        m.last_failure_at = Some(now);
        m.consecutive_failures = m.consecutive_failures.saturating_add(1);
    }

    pub fn record_retry(&self) {
        self.lock().total_retries += 1;
    }

    pub fn snapshot(&self) -> ConnectionMetrics {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = ConnectionMetrics::default();
    }
}

fn record_terminal(
    m: &mut ConnectionMetrics,
    endpoint: &str,
    latency: Duration,
    now: DateTime<Utc>,
    success: bool,
) {
    let latency_ms = latency.as_secs_f64() * 1000.0;

    m.total_requests += 1;
    m.avg_latency_ms = running_mean(m.avg_latency_ms, latency_ms, m.total_requests);

    let ep = m.per_endpoint.entry(endpoint.to_string()).or_default();
    ep.requests += 1;
    if success {
        ep.successes += 1;
    } else {
        ep.failures += 1;
    }
    ep.avg_latency_ms = running_mean(ep.avg_latency_ms, latency_ms, ep.requests);
    ep.last_accessed_at = Some(now);
}

fn running_mean(previous: f64, sample: f64, count: u64) -> f64 {
    previous + (sample - previous) / count as f64
}
