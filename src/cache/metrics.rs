//! Cache Metrics Collection
//!
//! Request, hit/miss, residency and eviction counters, with derived rates
//! computed at snapshot time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    total_hits: AtomicU64,
    total_misses: AtomicU64,
    /// Sum of lookup latencies (microseconds)
    total_response_us: AtomicU64,

    /// Resident bytes in the fastest tier
    cache_size: AtomicU64,
    /// Resident items in the fastest tier
    item_count: AtomicU64,

    evictions: AtomicU64,
    promotions: AtomicU64,
    expirations: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, latency: Duration) {
        self.total_hits.fetch_add(1, Ordering::Relaxed);
        self.record_request(latency);
    }

    pub fn record_miss(&self, latency: Duration) {
        self.total_misses.fetch_add(1, Ordering::Relaxed);
        self.record_request(latency);
    }

    fn record_request(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace the fastest-tier residency gauges
    pub fn update_resident(&self, size: u64, items: u64) {
        self.cache_size.store(size, Ordering::Relaxed);
        self.item_count.store(items, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits.load(Ordering::Relaxed)
    }

    pub fn total_misses(&self) -> u64 {
        self.total_misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// hits / requests
    pub fn hit_rate(&self) -> f64 {
        ratio(self.total_hits(), self.total_requests())
    }

    /// misses / requests
    pub fn miss_rate(&self) -> f64 {
        ratio(self.total_misses(), self.total_requests())
    }

    /// Mean lookup latency
    pub fn average_response_time(&self) -> Duration {
        let requests = self.total_requests();
        if requests == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_response_us.load(Ordering::Relaxed) / requests)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            hit_rate: self.hit_rate(),
            miss_rate: self.miss_rate(),
            total_requests: self.total_requests(),
            total_hits: self.total_hits(),
            total_misses: self.total_misses(),
            average_response_time: self.average_response_time().as_secs_f64() * 1000.0,
            cache_size: self.cache_size.load(Ordering::Relaxed),
            item_count: self.item_count.load(Ordering::Relaxed),
            evictions: self.evictions(),
            promotions: self.promotions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Reset request and eviction counters; residency gauges are kept
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_hits.store(0, Ordering::Relaxed);
        self.total_misses.store(0, Ordering::Relaxed);
        self.total_response_us.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    /// Render the current snapshot in Prometheus text format
    pub fn render_prometheus(&self) -> Result<String> {
        self.snapshot().render_prometheus()
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Snapshot of cache metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub total_requests: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Milliseconds
    pub average_response_time: f64,
    pub cache_size: u64,
    pub item_count: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub expirations: u64,
}

impl CacheMetrics {
    /// Prometheus text exposition of this snapshot
    pub fn render_prometheus(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("haven_cache".into()), None)?;

        let counts = [
            ("requests_total", "Cache lookups", self.total_requests),
            ("hits_total", "Cache lookups served from any tier", self.total_hits),
            ("misses_total", "Cache lookups that found nothing live", self.total_misses),
            ("size_bytes", "Resident bytes in the fastest tier", self.cache_size),
            ("items", "Resident items in the fastest tier", self.item_count),
            ("evictions_total", "Items evicted under capacity pressure", self.evictions),
            ("promotions_total", "Hits copied into the fastest tier", self.promotions),
            ("expirations_total", "Expired items purged on observation", self.expirations),
        ];
        for (name, help, value) in counts {
            let gauge = IntGauge::new(name, help)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let rates = [
            ("hit_rate", "Hits divided by requests", self.hit_rate),
            ("miss_rate", "Misses divided by requests", self.miss_rate),
            (
                "average_response_time_ms",
                "Mean lookup latency in milliseconds",
                self.average_response_time,
            ),
        ];
        for (name, help, value) in rates {
            let gauge = Gauge::new(name, help)?;
            gauge.set(value);
            registry.register(Box::new(gauge))?;
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::Error::Internal(format!("non-UTF-8 metrics output: {}", e)))
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
