//! Gateway counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Logical calls
    pub calls_total: AtomicU64,
    pub calls_success: AtomicU64,
    pub calls_fault: AtomicU64,

    // Token handling
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub logins: AtomicU64,
    pub login_failures: AtomicU64,

    // Recovery
    pub recoveries: AtomicU64,
    pub provisionings: AtomicU64,

    // Transport / breaker
    pub transport_failures: AtomicU64,
    pub circuit_rejections: AtomicU64,

    // Latency tracking (sum and count, averaged on read)
    pub total_latency_ms: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the end of a logical call
    pub fn record_call(&self, success: bool, latency_ms: u64) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_fault.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_login(&self, success: bool) {
        self.logins.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.login_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provisioning(&self) {
        self.provisionings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average call latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.calls_total.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_total: self.calls_total.load(Ordering::Relaxed),
            calls_success: self.calls_success.load(Ordering::Relaxed),
            calls_fault: self.calls_fault.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            login_failures: self.login_failures.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            provisionings: self.provisionings.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            average_latency_ms: self.average_latency_ms(),
        }
    }
}

/// Serializable copy of [`GatewayMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub calls_total: u64,
    pub calls_success: u64,
    pub calls_fault: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub logins: u64,
    pub login_failures: u64,
    pub recoveries: u64,
    pub provisionings: u64,
    pub transport_failures: u64,
    pub circuit_rejections: u64,
    pub average_latency_ms: f64,
}
