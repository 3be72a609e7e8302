//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and the origin tag
//! attached to every value handed back to a caller.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::clock::duration_ms;

// == Origin ==
/// How a value returned by the cache was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Served from the cache while fresh, or joined a refresh started by someone else.
    Hit,
    /// Produced by a worker run started by this caller.
    Miss,
    /// Served past its TTL because no fresh value could be obtained.
    Stale,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Origin::Hit => "hit",
            Origin::Miss => "miss",
            Origin::Stale => "stale",
        };
        f.write_str(tag)
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Time after `created_at` during which the entry is fresh
    pub ttl: Duration,
    /// Origin tag of this copy
    pub origin: Origin,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry tagged as a hit.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Freshness window
    /// * `now` - Creation timestamp in Unix milliseconds
    pub fn new(value: V, ttl: Duration, now: u64) -> Self {
        Self {
            value,
            created_at: now,
            ttl,
            origin: Origin::Hit,
        }
    }

    /// Returns the timestamp (Unix milliseconds) at which the entry turns stale.
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(duration_ms(self.ttl))
    }

    /// Returns the entry re-tagged with `origin`.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    // == Time To Live ==
    /// Returns remaining freshness in milliseconds, 0 once stale.
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.expires_at().saturating_sub(now)
    }

    /// Returns how long ago the entry was created.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("test_value", Duration::from_secs(60), 1_000);

        assert_eq!(entry.value, "test_value");
        assert_eq!(entry.created_at, 1_000);
        assert_eq!(entry.origin, Origin::Hit);
        assert_eq!(entry.expires_at(), 61_000);
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new("v", Duration::from_secs(10), 0);

        assert_eq!(entry.ttl_remaining_ms(4_000), 6_000);
        assert_eq!(entry.ttl_remaining_ms(10_000), 0);
        assert_eq!(entry.ttl_remaining_ms(99_000), 0);
    }

    #[test]
    fn test_with_origin_keeps_metadata() {
        let entry = CacheEntry::new(7, Duration::from_millis(5), 100).with_origin(Origin::Stale);

        assert_eq!(entry.origin, Origin::Stale);
        assert_eq!(entry.created_at, 100);
        assert_eq!(entry.value, 7);
    }

    #[test]
    fn test_origin_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Origin::Miss).unwrap(), "\"miss\"");
        assert_eq!(Origin::Stale.to_string(), "stale");
    }
}
