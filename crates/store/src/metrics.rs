//! Per-store operation counters.
//!
//! Thread-safe atomics; no global state. A snapshot is cheap and lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Operation counters one store instance keeps about itself.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    resolve_count: AtomicU64,
    resolve_latency_sum_ms: AtomicU64,
    describe_count: AtomicU64,
    validate_count: AtomicU64,
    error_count: AtomicU64,
    reauth_count: AtomicU64,
}

impl StoreMetrics {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation.
    ///
    /// `operation` is `resolve`, `describe` or `validate`; anything else
    /// counts only toward errors when `ok` is false.
    pub fn record_operation(&self, operation: &str, duration: Duration, ok: bool) {
        match operation {
            "resolve" => {
                self.resolve_count.fetch_add(1, Ordering::Relaxed);
                self.resolve_latency_sum_ms
                    .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
            }
            "describe" => {
                self.describe_count.fetch_add(1, Ordering::Relaxed);
            }
            "validate" => {
                self.validate_count.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if !ok {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one re-authentication (network stores).
    pub fn record_reauthentication(&self) {
        self.reauth_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total `resolve` calls.
    pub fn resolve_count(&self) -> u64 {
        self.resolve_count.load(Ordering::Relaxed)
    }

    /// Total `describe` calls.
    pub fn describe_count(&self) -> u64 {
        self.describe_count.load(Ordering::Relaxed)
    }

    /// Total `validate` calls.
    pub fn validate_count(&self) -> u64 {
        self.validate_count.load(Ordering::Relaxed)
    }

    /// Total failed operations.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Total re-authentications performed.
    pub fn reauthentication_count(&self) -> u64 {
        self.reauth_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = StoreMetrics::new();
        metrics.record_operation("resolve", Duration::from_millis(5), true);
        metrics.record_operation("resolve", Duration::from_millis(7), false);
        metrics.record_operation("describe", Duration::from_millis(1), true);
        assert_eq!(metrics.resolve_count(), 2);
        assert_eq!(metrics.describe_count(), 1);
        assert_eq!(metrics.error_count(), 1);
    }
}
