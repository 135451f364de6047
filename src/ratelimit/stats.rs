//! Decision counters for observability.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::limiter::RejectReason;

/// Running totals of admission decisions, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    allowed: AtomicU64,
    shaped: AtomicU64,
    log_only_passed: AtomicU64,
    concurrency_exceeded: AtomicU64,
    rate_exceeded: AtomicU64,
    sleep_quota_exhausted: AtomicU64,
    shaping_delay_exceeded: AtomicU64,
    blacked_out: AtomicU64,
}

/// Point-in-time copy of [`AdmissionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Calls admitted, including those that waited and log-only passes
    pub allowed: u64,
    /// Admitted calls that waited for a later window first
    pub shaped: u64,
    /// Calls that would have been rejected but were let through in log-only mode
    pub log_only_passed: u64,
    pub concurrency_exceeded: u64,
    pub rate_exceeded: u64,
    pub sleep_quota_exhausted: u64,
    pub shaping_delay_exceeded: u64,
    pub blacked_out: u64,
}

impl StatsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.concurrency_exceeded
            + self.rate_exceeded
            + self.sleep_quota_exhausted
            + self.shaping_delay_exceeded
            + self.blacked_out
    }

    pub fn total(&self) -> u64 {
        self.allowed + self.rejected()
    }
}

impl AdmissionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self, shaped: bool) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        if shaped {
            self.shaped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_log_only(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.log_only_passed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self, reason: RejectReason) {
        let slot = match reason {
            RejectReason::ConcurrencyExceeded => &self.concurrency_exceeded,
            RejectReason::RateExceeded => &self.rate_exceeded,
            RejectReason::SleepQuotaExhausted => &self.sleep_quota_exhausted,
            RejectReason::ShapingDelayExceeded => &self.shaping_delay_exceeded,
            RejectReason::BlackedOut => &self.blacked_out,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            shaped: self.shaped.load(Ordering::Relaxed),
            log_only_passed: self.log_only_passed.load(Ordering::Relaxed),
            concurrency_exceeded: self.concurrency_exceeded.load(Ordering::Relaxed),
            rate_exceeded: self.rate_exceeded.load(Ordering::Relaxed),
            sleep_quota_exhausted: self.sleep_quota_exhausted.load(Ordering::Relaxed),
            shaping_delay_exceeded: self.shaping_delay_exceeded.load(Ordering::Relaxed),
            blacked_out: self.blacked_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_totals() {
        let stats = AdmissionStats::new();
        stats.record_allowed(false);
        stats.record_allowed(true);
        stats.record_log_only();
        stats.record_rejected(RejectReason::RateExceeded);
        stats.record_rejected(RejectReason::BlackedOut);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allowed, 3);
        assert_eq!(snapshot.shaped, 1);
        assert_eq!(snapshot.log_only_passed, 1);
        assert_eq!(snapshot.rejected(), 2);
        assert_eq!(snapshot.total(), 5);
    }
}
