//! Internal metrics collection.
//!
//! Lock-free counters read by the health endpoint and logged by the
//! scheduler's metrics tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for usage ingestion.
#[derive(Debug, Default)]
pub struct Metrics {
    // Ingress
    pub reports_received: Counter,
    pub reports_accepted: Counter,
    pub reports_rate_limited: Counter,
    pub reports_rejected: Counter,
    pub operations_received: Counter,

    // Admission caches
    pub config_cache_hits: Counter,
    pub config_cache_misses: Counter,
    pub target_index_reloads: Counter,
    pub target_index_reload_errors: Counter,
    pub target_index_size: Gauge,

    // Ingestor
    pub reports_consumed: Counter,
    pub transcoding_failures: Counter,
    pub operations_written: Counter,
    pub registry_records_written: Counter,
    pub clickhouse_insert_errors: Counter,

    // Jobs
    pub dedup_claims: Counter,
    pub dedup_claims_skipped: Counter,
    pub deliveries_sent: Counter,
    pub deliveries_failed: Counter,

    // Latency histograms
    pub ingest_latency_ms: Histogram,
    pub clickhouse_latency_ms: Histogram,
    pub delivery_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub reports_received: u64,
    pub reports_accepted: u64,
    pub reports_rate_limited: u64,
    pub reports_rejected: u64,
    pub config_cache_hits: u64,
    pub config_cache_misses: u64,
    pub target_index_size: u64,
    pub target_index_reload_errors: u64,
    pub reports_consumed: u64,
    pub transcoding_failures: u64,
    pub operations_written: u64,
    pub clickhouse_insert_errors: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
    pub ingest_latency_mean_ms: f64,
    pub clickhouse_latency_mean_ms: f64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            reports_received: self.reports_received.get(),
            reports_accepted: self.reports_accepted.get(),
            reports_rate_limited: self.reports_rate_limited.get(),
            reports_rejected: self.reports_rejected.get(),
            config_cache_hits: self.config_cache_hits.get(),
            config_cache_misses: self.config_cache_misses.get(),
            target_index_size: self.target_index_size.get(),
            target_index_reload_errors: self.target_index_reload_errors.get(),
            reports_consumed: self.reports_consumed.get(),
            transcoding_failures: self.transcoding_failures.get(),
            operations_written: self.operations_written.get(),
            clickhouse_insert_errors: self.clickhouse_insert_errors.get(),
            deliveries_sent: self.deliveries_sent.get(),
            deliveries_failed: self.deliveries_failed.get(),
            ingest_latency_mean_ms: self.ingest_latency_ms.mean(),
            clickhouse_latency_mean_ms: self.clickhouse_latency_ms.mean(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
