//! Dispatch counters
//!
//! Relaxed atomics updated on the dispatch path; read through
//! [`ControllerMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub calls: AtomicU64,
    pub publishes: AtomicU64,
    pub local_dispatches: AtomicU64,
    pub remote_forwards: AtomicU64,
    pub handler_failures: AtomicU64,
    pub publish_failures: AtomicU64,
    pub total_handler_time_ns: AtomicU64,
}

impl ControllerMetrics {
    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local(&self, elapsed: Duration, success: bool) {
        self.local_dispatches.fetch_add(1, Ordering::Relaxed);
        self.total_handler_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if !success {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_remote_forward(&self) {
        self.remote_forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_handler_time_ns(&self) -> f64 {
        let count = self.local_dispatches.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_handler_time_ns.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            local_dispatches: self.local_dispatches.load(Ordering::Relaxed),
            remote_forwards: self.remote_forwards.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            avg_handler_time_ns: self.avg_handler_time_ns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub publishes: u64,
    pub local_dispatches: u64,
    pub remote_forwards: u64,
    pub handler_failures: u64,
    pub publish_failures: u64,
    pub avg_handler_time_ns: f64,
}
