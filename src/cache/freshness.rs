//! Freshness Classifier
//!
//! Pure predicates over an explicit `now`.

use crate::cache::{Backoff, CacheEntry};

/// An entry is fresh while `created_at + ttl > now`.
///
/// A zero TTL is therefore stale from creation.
pub fn is_fresh<V>(entry: &CacheEntry<V>, now: u64) -> bool {
    entry.expires_at() > now
}

/// A backoff window is active while `wait_until > now`.
pub fn is_waiting(record: Option<&Backoff>, now: u64) -> bool {
    record.is_some_and(|record| record.wait_until > now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fresh_until_ttl_reached() {
        let entry = CacheEntry::new("yo", Duration::from_millis(1000), 10_000);

        assert!(is_fresh(&entry, 10_000));
        assert!(is_fresh(&entry, 10_999));
        assert!(!is_fresh(&entry, 11_000));
    }

    #[test]
    fn test_zero_ttl_is_stale_immediately() {
        let entry = CacheEntry::new("yo", Duration::ZERO, 10_000);
        assert!(!is_fresh(&entry, 10_000));
    }

    #[test]
    fn test_waiting() {
        let record = Backoff::new(Duration::from_millis(1000), 0);

        assert!(is_waiting(Some(&record), 999));
        assert!(!is_waiting(Some(&record), 1000));
        assert!(!is_waiting(None, 0));
    }
}
