//! Debug Snapshot Module
//!
//! Serializable dump of the cache: configuration, per-key hot/stale
//! classification with backoff state, and statistics.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::clock::duration_ms;
use crate::cache::handle::State;
use crate::cache::freshness::is_fresh;
use crate::cache::{Backoff, CacheEntry, CacheStats};
use crate::config::CacheConfig;

// == Options ==
/// What to include in a debug snapshot.
#[derive(Debug, Clone, Default)]
pub struct DebugOptions {
    /// Include values
    pub full: bool,
    /// Only list keys matching this pattern
    pub search: Option<String>,
    /// Extra fields merged into the snapshot
    pub extra: Map<String, Value>,
}

impl DebugOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    pub fn search(mut self, pattern: impl Into<String>) -> Self {
        self.search = Some(pattern.into());
        self
    }

    /// Adds a field unless one with the same name is already present, so
    /// values supplied by the caller win over those added by middleware.
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.entry(name.into()).or_insert_with(|| value.into());
        self
    }
}

// == Snapshot ==
#[derive(Debug, Clone, Serialize)]
pub struct WaitingInfo {
    pub started: DateTime<Utc>,
    pub wait_ms: u64,
    pub wait_until: DateTime<Utc>,
}

impl From<Backoff> for WaitingInfo {
    fn from(backoff: Backoff) -> Self {
        Self {
            started: to_datetime(backoff.started_at),
            wait_ms: backoff.wait_ms,
            wait_until: to_datetime(backoff.wait_until),
        }
    }
}

/// One key in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo<V> {
    pub key: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitingInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<V>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugKeys<V> {
    pub hot: Vec<KeyInfo<V>>,
    pub stale: Vec<KeyInfo<V>>,
}

/// Diagnostic dump returned by `debug`.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo<V> {
    pub now: DateTime<Utc>,
    pub name: String,
    pub max_length: usize,
    /// Maximum age in hours, e.g. `"48h"`
    pub max_age: String,
    pub default_ttl_ms: u64,
    pub worker_timeout_ms: u64,
    pub delta_wait_ms: u64,
    pub item_count: usize,
    pub in_flight: usize,
    pub keys: DebugKeys<V>,
    pub stats: CacheStats,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<V: Clone> DebugInfo<V> {
    pub(super) fn collect(
        config: &CacheConfig,
        state: &State<V>,
        search: Option<&Regex>,
        options: DebugOptions,
        now: u64,
    ) -> Self {
        let mut keys = DebugKeys {
            hot: Vec::new(),
            stale: Vec::new(),
        };

        for (key, entry) in state.store.iter() {
            if search.is_some_and(|re| !re.is_match(key)) {
                continue;
            }
            let info = key_info(key, entry, state.backoff.get(key), options.full, now);
            if is_fresh(entry, now) {
                keys.hot.push(info);
            } else {
                keys.stale.push(info);
            }
        }

        let mut stats = state.stats.clone();
        stats.set_total_entries(state.store.len());

        Self {
            now: to_datetime(now),
            name: config.name.clone(),
            max_length: config.max_length,
            max_age: format!("{}h", duration_ms(config.max_age) as f64 / 3_600_000.0),
            default_ttl_ms: duration_ms(config.default_ttl),
            worker_timeout_ms: duration_ms(config.worker_timeout),
            delta_wait_ms: duration_ms(config.delta_wait),
            item_count: state.store.len(),
            in_flight: state.jobs.len(),
            keys,
            stats,
            extra: options.extra,
        }
    }
}

fn key_info<V: Clone>(
    key: &str,
    entry: &CacheEntry<V>,
    backoff: Option<Backoff>,
    full: bool,
    now: u64,
) -> KeyInfo<V> {
    KeyInfo {
        key: key.to_string(),
        created: to_datetime(entry.created_at),
        expires: to_datetime(entry.expires_at()),
        expired: entry.expires_at() <= now,
        waiting: backoff.map(WaitingInfo::from),
        value: full.then(|| entry.value.clone()),
    }
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_extra_keeps_first_value() {
        let options = DebugOptions::new()
            .with_extra("namespace", "caller")
            .with_extra("namespace", "middleware");

        assert_eq!(options.extra["namespace"], "caller");
    }

    #[test]
    fn test_to_datetime() {
        assert_eq!(to_datetime(0).timestamp_millis(), 0);
        assert_eq!(to_datetime(1_500).timestamp_millis(), 1_500);
    }

    #[test]
    fn test_key_info_hides_value_unless_full() {
        let entry = CacheEntry::new(5, std::time::Duration::from_millis(10), 100);
        let backoff = Some(Backoff::new(std::time::Duration::from_millis(10), 100));

        let lean = key_info("k", &entry, None, false, 105);
        assert!(lean.value.is_none());
        assert!(!lean.expired);

        let full = key_info("k", &entry, backoff, true, 110);
        assert_eq!(full.value, Some(5));
        assert!(full.expired);
        assert_eq!(full.waiting.unwrap().wait_ms, 10);
    }
}
