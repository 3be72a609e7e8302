//! Backoff Tracker Module
//!
//! Per-key "don't retry until" records, armed when a worker fails and
//! cleared when one succeeds.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::cache::clock::duration_ms;

// == Backoff ==
/// A cooldown window during which the worker for a key is not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Backoff {
    /// When the window opened (Unix milliseconds)
    pub started_at: u64,
    /// Window length in milliseconds
    pub wait_ms: u64,
    /// When the window closes (Unix milliseconds)
    pub wait_until: u64,
}

impl Backoff {
    /// Opens a window of `wait` starting at `now`.
    pub fn new(wait: Duration, now: u64) -> Self {
        let wait_ms = duration_ms(wait);
        Self {
            started_at: now,
            wait_ms,
            wait_until: now.saturating_add(wait_ms),
        }
    }
}

// == Backoff Tracker ==
/// Backoff records keyed like cache entries but stored separately.
///
/// The tracker does not grow windows on repeated failures; every failure
/// re-arms the window the caller asks for.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    records: HashMap<String, Backoff>,
}

impl BackoffTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the window for `key`.
    pub fn set(&mut self, key: &str, wait: Duration, now: u64) -> Backoff {
        let record = Backoff::new(wait, now);
        self.records.insert(key.to_string(), record);
        record
    }

    /// Returns the record for `key`, active or not.
    pub fn get(&self, key: &str) -> Option<Backoff> {
        self.records.get(key).copied()
    }

    /// Removes the record for `key`.
    pub fn clear(&mut self, key: &str) {
        self.records.remove(key);
    }

    /// Number of recorded keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no key has a record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
