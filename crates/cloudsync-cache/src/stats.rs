//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for cache and on-demand operations.
///
/// All counters are atomic and can be safely accessed from multiple threads.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that found an entity.
    hits: AtomicU64,
    /// Lookups that found nothing.
    misses: AtomicU64,
    /// Whole-namespace installs.
    namespaces_installed: AtomicU64,
    /// Entities removed from the main cache outside a full install.
    entities_evicted: AtomicU64,
    /// On-demand entries written.
    on_demand_stored: AtomicU64,
    /// On-demand entries kept by a reconcile pass.
    on_demand_kept: AtomicU64,
    /// On-demand entries evicted by a reconcile pass.
    on_demand_evicted: AtomicU64,
}

impl CacheStats {
    /// Create new cache statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup miss.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a namespace install.
    #[inline]
    pub fn record_install(&self) {
        self.namespaces_installed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record entities evicted from the main cache.
    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.entities_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record an on-demand write.
    #[inline]
    pub fn record_on_demand_stored(&self) {
        self.on_demand_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an on-demand entry kept for another cycle.
    #[inline]
    pub fn record_on_demand_kept(&self) {
        self.on_demand_kept.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an on-demand entry evicted.
    #[inline]
    pub fn record_on_demand_evicted(&self) {
        self.on_demand_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Total lookup hits.
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total lookup misses.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total namespace installs.
    #[inline]
    pub fn namespaces_installed(&self) -> u64 {
        self.namespaces_installed.load(Ordering::Relaxed)
    }

    /// Total entities evicted from the main cache.
    #[inline]
    pub fn entities_evicted(&self) -> u64 {
        self.entities_evicted.load(Ordering::Relaxed)
    }

    /// Total on-demand writes.
    #[inline]
    pub fn on_demand_stored(&self) -> u64 {
        self.on_demand_stored.load(Ordering::Relaxed)
    }

    /// Total on-demand entries kept.
    #[inline]
    pub fn on_demand_kept(&self) -> u64 {
        self.on_demand_kept.load(Ordering::Relaxed)
    }

    /// Total on-demand entries evicted.
    #[inline]
    pub fn on_demand_evicted(&self) -> u64 {
        self.on_demand_evicted.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.namespaces_installed.store(0, Ordering::Relaxed);
        self.entities_evicted.store(0, Ordering::Relaxed);
        self.on_demand_stored.store(0, Ordering::Relaxed);
        self.on_demand_kept.store(0, Ordering::Relaxed);
        self.on_demand_evicted.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_stats_basic() {
        let stats = CacheStats::new();

        stats.record_install();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_evictions(3);

        assert_eq!(stats.namespaces_installed(), 1);
        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.entities_evicted(), 3);
        assert!((stats.hit_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn cache_stats_reset() {
        let stats = CacheStats::new();
        stats.record_on_demand_stored();
        stats.record_on_demand_kept();
        stats.reset();
        assert_eq!(stats.on_demand_stored(), 0);
        assert_eq!(stats.on_demand_kept(), 0);
    }
}
