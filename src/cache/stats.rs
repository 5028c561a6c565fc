use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of both cache tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub memory_budget: usize,

    /// Whether the disk tier is open and healthy
    pub disk_enabled: bool,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub disk_quota: u64,

    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served by either tier, or `None` before the
    /// first lookup.
    pub fn hit_ratio(&self) -> Option<f64> {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        (total > 0).then(|| hits as f64 / total as f64)
    }
}

/// Lookup counters shared by concurrent callers.
#[derive(Debug, Default)]
pub(crate) struct LookupCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl LookupCounters {
    pub(crate) fn memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into `stats`.
    pub(crate) fn fill(&self, stats: &mut CacheStats) {
        stats.memory_hits = self.memory_hits.load(Ordering::Relaxed);
        stats.disk_hits = self.disk_hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
    }
}
