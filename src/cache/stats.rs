//! Cache Statistics Module
//!
//! Counters for how reads were served and how often workers ran.

use serde::Serialize;

// == Cache Stats ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads served fresh, including callers that joined a running worker
    pub hits: u64,
    /// Worker runs started
    pub misses: u64,
    /// Reads served past their TTL
    pub stale: u64,
    /// Worker runs that failed or timed out
    pub failures: u64,
    /// Entries handed to disposers
    pub evictions: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Share of reads served without starting a worker.
    ///
    /// Returns (hits + stale) / (hits + stale + misses), or 0.0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_stale(&mut self) {
        self.stale += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::new().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_stale_as_served() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_stale();
        stats.record_miss();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_record_evictions() {
        let mut stats = CacheStats::new();
        stats.record_evictions(2);
        stats.record_evictions(0);
        stats.record_failure();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.failures, 1);
    }
}
