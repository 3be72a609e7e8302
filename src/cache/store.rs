//! Entry Store Module
//!
//! Bounded key -> entry table combining HashMap storage with LRU tracking.
//! Removals are queued as [`Eviction`]s so the owner can notify disposers
//! after releasing its lock.

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::clock::duration_ms;
use crate::cache::{CacheEntry, LruTracker};

// == Eviction ==
/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Pushed out by a newer entry while at capacity
    Capacity,
    /// Older than the store's maximum age
    Aged,
    /// Removed by an explicit delete
    Deleted,
    /// Removed by a clear
    Cleared,
}

/// An entry that was removed from the store.
#[derive(Debug, Clone)]
pub struct Eviction<V> {
    pub key: String,
    pub entry: CacheEntry<V>,
    pub reason: EvictionReason,
}

// == Entry Store ==
/// Cache storage with LRU eviction and an age bound.
#[derive(Debug)]
pub struct EntryStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// LRU access tracker
    lru: LruTracker,
    /// Maximum number of entries, 0 = unbounded
    max_length: usize,
    /// Maximum entry age regardless of recency, zero = unbounded
    max_age: Duration,
    /// Evictions not yet handed to disposers
    evicted: Vec<Eviction<V>>,
}

impl<V: Clone> EntryStore<V> {
    // == Constructor ==
    /// Creates a new store.
    ///
    /// # Arguments
    /// * `max_length` - Maximum number of entries (0 disables the bound)
    /// * `max_age` - Age after which entries are dropped (zero disables the bound)
    pub fn new(max_length: usize, max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            max_length,
            max_age,
            evicted: Vec::new(),
        }
    }

    // == Get ==
    /// Returns a copy of the entry and marks it most recently used.
    ///
    /// Entries older than `max_age` are evicted and reported absent.
    pub fn get(&mut self, key: &str, now: u64) -> Option<CacheEntry<V>> {
        let aged = self.is_aged(self.entries.get(key)?, now);
        if aged {
            self.remove(key, EvictionReason::Aged);
            return None;
        }

        self.lru.touch(key);
        self.entries.get(key).cloned()
    }

    /// Returns the entry without touching recency.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    // == Set ==
    /// Stores a value, replacing any existing entry for the key.
    ///
    /// The new entry becomes most recently used. If the store then holds more
    /// than `max_length` entries, the least recently used ones are evicted.
    /// Replacing an existing entry is not an eviction.
    pub fn set(&mut self, key: &str, value: V, ttl: Duration, now: u64) -> CacheEntry<V> {
        let entry = CacheEntry::new(value, ttl, now);
        self.entries.insert(key.to_string(), entry.clone());
        self.lru.touch(key);

        while self.max_length > 0 && self.entries.len() > self.max_length {
            let Some(oldest) = self.lru.evict_oldest() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.evicted.push(Eviction {
                    key: oldest,
                    entry,
                    reason: EvictionReason::Capacity,
                });
            }
        }

        entry
    }

    /// Returns true if the key is present and not past `max_age`.
    pub fn has(&self, key: &str, now: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !self.is_aged(entry, now))
    }

    // == Delete ==
    /// Removes an entry. Returns false if the key was absent.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key, EvictionReason::Deleted)
    }

    /// Removes every entry, most recently used first.
    pub fn clear(&mut self) {
        let keys: Vec<String> = self.lru.iter().map(str::to_string).collect();
        for key in keys {
            if let Some(entry) = self.entries.remove(&key) {
                self.evicted.push(Eviction {
                    key,
                    entry,
                    reason: EvictionReason::Cleared,
                });
            }
        }
        self.lru.clear();
    }

    // == Expire ==
    /// Drops the entry's TTL to zero so the next freshness check sees it stale.
    pub fn expire(&mut self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.ttl = Duration::ZERO;
                true
            }
            None => false,
        }
    }

    // == Prune ==
    /// Evicts every entry older than `max_age`. Returns the number removed.
    pub fn prune(&mut self, now: u64) -> usize {
        let aged: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_aged(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &aged {
            self.remove(key, EvictionReason::Aged);
        }
        aged.len()
    }

    // == Listings ==
    /// Iterates entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry<V>)> {
        self.lru
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, entry)))
    }

    /// Keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.lru.iter().map(str::to_string).collect()
    }

    /// Copies of all entries, most recently used first.
    pub fn entries(&self) -> Vec<(String, CacheEntry<V>)> {
        self.iter()
            .map(|(key, entry)| (key.to_string(), entry.clone()))
            .collect()
    }

    /// Hands over the evictions queued since the last call.
    pub fn take_evicted(&mut self) -> Vec<Eviction<V>> {
        std::mem::take(&mut self.evicted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_aged(&self, entry: &CacheEntry<V>, now: u64) -> bool {
        !self.max_age.is_zero() && entry.age_ms(now) > duration_ms(self.max_age)
    }

    fn remove(&mut self, key: &str, reason: EvictionReason) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.lru.remove(key);
                self.evicted.push(Eviction {
                    key: key.to_string(),
                    entry,
                    reason,
                });
                true
            }
            None => false,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn evicted_keys<V: Clone>(store: &mut EntryStore<V>) -> Vec<String> {
        store.take_evicted().into_iter().map(|e| e.key).collect()
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = EntryStore::new(100, DAY);

        let written = store.set("key1", "value1", TTL, 10);
        let read = store.get("key1", 20).unwrap();

        assert_eq!(written, read);
        assert_eq!(read.value, "value1");
        assert_eq!(read.created_at, 10);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store: EntryStore<String> = EntryStore::new(100, DAY);
        assert!(store.get("nonexistent", 0).is_none());
    }

    #[test]
    fn test_store_overwrite_is_not_eviction() {
        let mut store = EntryStore::new(100, DAY);

        store.set("key1", "value1", TTL, 0);
        store.set("key1", "value2", TTL, 1);

        assert_eq!(store.get("key1", 2).unwrap().value, "value2");
        assert_eq!(store.len(), 1);
        assert!(store.take_evicted().is_empty());
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = EntryStore::new(2, DAY);

        store.set("A", 1, TTL, 0);
        store.set("B", 2, TTL, 0);
        store.set("C", 3, TTL, 0);

        assert_eq!(store.keys(), vec!["C", "B"]);
        let evicted = store.take_evicted();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "A");
        assert_eq!(evicted[0].entry.value, 1);
        assert_eq!(evicted[0].reason, EvictionReason::Capacity);
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let mut store = EntryStore::new(3, DAY);

        store.set("key1", 1, TTL, 0);
        store.set("key2", 2, TTL, 0);
        store.set("key3", 3, TTL, 0);
        store.get("key1", 0).unwrap();
        store.set("key4", 4, TTL, 0);

        assert_eq!(evicted_keys(&mut store), vec!["key2"]);
        assert!(store.has("key1", 0));
    }

    #[test]
    fn test_store_peek_does_not_touch() {
        let mut store = EntryStore::new(2, DAY);

        store.set("a", 1, TTL, 0);
        store.set("b", 2, TTL, 0);
        assert!(store.peek("a").is_some());
        store.set("c", 3, TTL, 0);

        assert_eq!(evicted_keys(&mut store), vec!["a"]);
    }

    #[test]
    fn test_store_delete_and_clear_queue_evictions() {
        let mut store = EntryStore::new(10, DAY);

        store.set("a", 1, TTL, 0);
        store.set("b", 2, TTL, 0);
        store.set("c", 3, TTL, 0);

        assert!(store.delete("b"));
        assert!(!store.delete("b"));
        assert_eq!(evicted_keys(&mut store), vec!["b"]);

        store.clear();
        let evicted = store.take_evicted();
        assert_eq!(evicted.len(), 2);
        assert!(evicted.iter().all(|e| e.reason == EvictionReason::Cleared));
        assert!(store.is_empty());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_store_expire_keeps_created_and_recency() {
        let mut store = EntryStore::new(10, DAY);

        store.set("a", 1, TTL, 5);
        store.set("b", 2, TTL, 5);
        assert!(store.expire("a"));
        assert!(!store.expire("missing"));

        let entry = store.peek("a").unwrap();
        assert_eq!(entry.ttl, Duration::ZERO);
        assert_eq!(entry.created_at, 5);
        assert_eq!(store.keys(), vec!["b", "a"]);
    }

    #[test]
    fn test_store_max_age() {
        let mut store = EntryStore::new(10, Duration::from_millis(100));

        store.set("old", 1, TTL, 0);
        store.set("young", 2, TTL, 90);

        assert!(!store.has("old", 101));
        assert_eq!(store.len(), 2);

        assert!(store.get("old", 101).is_none());
        let evicted = store.take_evicted();
        assert_eq!(evicted[0].key, "old");
        assert_eq!(evicted[0].reason, EvictionReason::Aged);

        assert_eq!(store.prune(500), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_zero_bounds_are_unbounded() {
        let mut store = EntryStore::new(0, Duration::ZERO);
        for i in 0..50 {
            store.set(&format!("k{i}"), i, TTL, 0);
        }

        assert_eq!(store.len(), 50);
        assert!(store.has("k0", u64::MAX));
        assert!(store.take_evicted().is_empty());
    }

    #[test]
    fn test_store_entries_most_recent_first() {
        let mut store = EntryStore::new(10, DAY);
        store.set("x", 1, TTL, 0);
        store.set("y", 2, TTL, 0);

        let entries = store.entries();
        assert_eq!(entries[0].0, "y");
        assert_eq!(entries[1].1.value, 1);
    }
}
