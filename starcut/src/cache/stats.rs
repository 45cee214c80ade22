//! Cache statistics tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe cache counters.
///
/// Updated from the batch workers; read for periodic logging and the
/// final batch summary.
#[derive(Debug, Default)]
pub struct CacheStats {
    ephemeral_hits: AtomicU64,
    permanent_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalid_rejections: AtomicU64,
    unreadable_entries: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Requests served from the per-run tier
    pub ephemeral_hits: u64,
    /// Requests served from the permanent tier
    pub permanent_hits: u64,
    /// Requests that had to compute
    pub misses: u64,
    /// Artifacts persisted (counted once per fingerprint)
    pub writes: u64,
    /// Artifacts rejected by the invalid-value policy
    pub invalid_rejections: u64,
    /// Tier hits whose backing file could not be read
    pub unreadable_entries: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ephemeral_hit(&self) {
        self.ephemeral_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permanent_hit(&self) {
        self.permanent_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_rejection(&self) {
        self.invalid_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unreadable_entry(&self) {
        self.unreadable_entries.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            ephemeral_hits: self.ephemeral_hits.load(Ordering::Relaxed),
            permanent_hits: self.permanent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalid_rejections: self.invalid_rejections.load(Ordering::Relaxed),
            unreadable_entries: self.unreadable_entries.load(Ordering::Relaxed),
        }
    }
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served from either tier, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.ephemeral_hits + self.permanent_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
