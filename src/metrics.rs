//! Per-engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one sync engine. Cheap to bump from any task.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub sync_calls: AtomicU64,
    /// Payloads overwritten before they reached the server.
    pub coalesced_payloads: AtomicU64,
    pub save_attempts: AtomicU64,
    pub save_successes: AtomicU64,
    pub save_failures: AtomicU64,
    pub rate_limited: AtomicU64,
    pub retries_exhausted: AtomicU64,
    pub offline_deferrals: AtomicU64,
}

impl SyncMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            sync_calls: self.sync_calls.load(Ordering::Relaxed),
            coalesced_payloads: self.coalesced_payloads.load(Ordering::Relaxed),
            save_attempts: self.save_attempts.load(Ordering::Relaxed),
            save_successes: self.save_successes.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            offline_deferrals: self.offline_deferrals.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub sync_calls: u64,
    pub coalesced_payloads: u64,
    pub save_attempts: u64,
    pub save_successes: u64,
    pub save_failures: u64,
    pub rate_limited: u64,
    pub retries_exhausted: u64,
    pub offline_deferrals: u64,
}
