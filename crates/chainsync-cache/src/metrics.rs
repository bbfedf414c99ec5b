//! Cache metrics definitions.
//!
//! OpenTelemetry instruments plus an in-process mirror ([`CacheStats`])
//! for health endpoints and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};
use serde::{Deserialize, Serialize};

use crate::store::StoreInfo;

/// OpenTelemetry handle for cache operations.
#[derive(Clone)]
pub struct CacheMetrics {
    pub hits: Counter<u64>,
    pub misses: Counter<u64>,
    pub errors: Counter<u64>,
    pub operation_duration_ms: Histogram<f64>,
    pub keys: Gauge<u64>,
    pub memory_bytes: Gauge<u64>,
}

impl CacheMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            hits: meter
                .u64_counter("chainsync.cache.hits")
                .with_description("Cache lookups that returned a value")
                .build(),
            misses: meter
                .u64_counter("chainsync.cache.misses")
                .with_description("Cache lookups that returned nothing")
                .build(),
            errors: meter
                .u64_counter("chainsync.cache.errors")
                .with_description("Cache operations that failed and degraded to a miss")
                .build(),
            operation_duration_ms: meter
                .f64_histogram("chainsync.cache.operation_duration_ms")
                .with_description("Cache operation latency in milliseconds")
                .with_unit("ms")
                .build(),
            keys: meter
                .u64_gauge("chainsync.cache.keys")
                .with_description("Approximate number of keys in the store")
                .build(),
            memory_bytes: meter
                .u64_gauge("chainsync.cache.memory_bytes")
                .with_description("Memory reported by the store")
                .with_unit("By")
                .build(),
        }
    }

    pub fn global() -> Self {
        Self::new(&global::meter("chainsync"))
    }

    pub fn record_hit(&self, operation: &'static str) {
        self.hits.add(1, &[KeyValue::new("operation", operation)]);
    }

    pub fn record_miss(&self, operation: &'static str) {
        self.misses.add(1, &[KeyValue::new("operation", operation)]);
    }

    pub fn record_error(&self, operation: &'static str) {
        self.errors.add(1, &[KeyValue::new("operation", operation)]);
    }

    pub fn record_duration(&self, operation: &'static str, ms: f64) {
        self.operation_duration_ms
            .record(ms, &[KeyValue::new("operation", operation)]);
    }

    pub fn record_store_info(&self, info: StoreInfo) {
        self.keys.record(info.key_count, &[]);
        self.memory_bytes.record(info.used_memory_bytes, &[]);
    }
}

/// Lock-free counters mirroring [`CacheMetrics`].
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    key_count: AtomicU64,
    memory_bytes: AtomicU64,
}

/// Point-in-time view of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub key_count: u64,
    pub memory_bytes: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups that hit, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_info(&self, info: StoreInfo) {
        self.key_count.store(info.key_count, Ordering::Relaxed);
        self.memory_bytes
            .store(info.used_memory_bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            key_count: self.key_count.load(Ordering::Relaxed),
            memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
        }
    }
}
