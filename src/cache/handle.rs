//! Cache Core Module
//!
//! The un-wrapped cache: entry store, backoff tracker and in-flight job
//! registry behind a single lock, plus the disposer list. Middleware
//! factories receive a [`CacheCore`] so their own calls never re-enter the
//! middleware chain.
//!
//! Disposers run after the lock is released, but they must not mutate the
//! cache from inside their own invocation: an eviction that triggers another
//! eviction has no defined order.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, Span};

use crate::cache::coordinator::Job;
use crate::cache::debug::{DebugInfo, DebugOptions};
use crate::cache::freshness::is_fresh;
use crate::cache::store::Eviction;
use crate::cache::{
    pattern, Backoff, BackoffTracker, CacheEntry, CacheStats, CacheValue, Clock, EntryStore,
    Origin,
};
use crate::config::CacheConfig;
use crate::error::Result;

// == Disposers ==
/// Callback invoked with every evicted key and entry.
pub type Disposer<V> = Arc<dyn Fn(&str, &CacheEntry<V>) + Send + Sync>;

/// Handle returned by [`CacheCore::add_disposer`], used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisposerId(u64);

// == Shared State ==
pub(super) struct State<V> {
    pub(super) store: EntryStore<V>,
    pub(super) backoff: BackoffTracker,
    pub(super) jobs: HashMap<String, Job<V>>,
    pub(super) stats: CacheStats,
}

pub(super) struct Inner<V> {
    pub(super) state: Mutex<State<V>>,
    pub(super) disposers: RwLock<Vec<(DisposerId, Disposer<V>)>>,
    pub(super) next_disposer: AtomicU64,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: CacheConfig,
    pub(super) span: Span,
}

// == Cache Core ==
/// Cheaply cloneable handle to the cache state.
pub struct CacheCore<V> {
    pub(super) inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheCore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for CacheCore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCore")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

impl<V: CacheValue> CacheCore<V> {
    // == Constructor ==
    pub(crate) fn new(config: CacheConfig, clock: Arc<dyn Clock>, span: Span) -> Self {
        let state = State {
            store: EntryStore::new(config.max_length, config.max_age),
            backoff: BackoffTracker::new(),
            jobs: HashMap::new(),
            stats: CacheStats::new(),
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                disposers: RwLock::new(Vec::new()),
                next_disposer: AtomicU64::new(0),
                clock,
                config,
                span,
            }),
        }
    }

    /// Runs `f` under the state lock with the current time, then hands any
    /// evictions it caused to the disposers once the lock is released.
    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut State<V>, u64) -> R) -> R {
        let (result, evicted) = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now_ms();
            let result = f(&mut state, now);

            let evicted = state.store.take_evicted();
            let len = state.store.len();
            state.stats.record_evictions(evicted.len());
            state.stats.set_total_entries(len);
            (result, evicted)
        };

        self.notify(evicted);
        result
    }

    fn notify(&self, evicted: Vec<Eviction<V>>) {
        if evicted.is_empty() {
            return;
        }

        let disposers: Vec<Disposer<V>> = self
            .inner
            .disposers
            .read()
            .iter()
            .map(|(_, disposer)| Arc::clone(disposer))
            .collect();

        for eviction in &evicted {
            debug!(
                parent: &self.inner.span,
                key = %eviction.key,
                reason = ?eviction.reason,
                "entry evicted"
            );
            for disposer in &disposers {
                disposer(&eviction.key, &eviction.entry);
            }
        }
    }

    // == Lookup ==
    /// Classify-only read: never runs a worker and never waits.
    ///
    /// Returns the entry tagged `hit` when fresh, `stale` when past its TTL,
    /// or `None` when absent.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry<V>> {
        self.with_state(|state, now| {
            let entry = state.store.get(key, now)?;
            if is_fresh(&entry, now) {
                state.stats.record_hit();
                Some(entry.with_origin(Origin::Hit))
            } else {
                state.stats.record_stale();
                Some(entry.with_origin(Origin::Stale))
            }
        })
    }

    // == Set ==
    /// Stores a value. `None` uses the configured default TTL.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        self.with_state(|state, now| {
            state.store.set(key, value, ttl, now);
        });
    }

    /// Returns true if the key is cached (fresh or stale).
    pub fn has(&self, key: &str) -> bool {
        let state = self.inner.state.lock();
        state.store.has(key, self.inner.clock.now_ms())
    }

    // == Delete ==
    /// Removes a key, notifying disposers. Returns false if it was absent.
    pub fn del(&self, key: &str) -> bool {
        self.with_state(|state, _| state.store.delete(key))
    }

    /// Removes every entry, notifying disposers once per entry.
    pub fn clear(&self) {
        self.with_state(|state, _| state.store.clear());
    }

    // == Listings ==
    /// Keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().store.keys()
    }

    /// Values, most recently used first.
    pub fn values(&self) -> Vec<V> {
        self.inner
            .state
            .lock()
            .store
            .iter()
            .map(|(_, entry)| entry.value.clone())
            .collect()
    }

    /// Key/entry pairs, most recently used first.
    pub fn entries(&self) -> Vec<(String, CacheEntry<V>)> {
        self.inner.state.lock().store.entries()
    }

    /// Copy of an entry without touching recency or statistics.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner.state.lock().store.peek(key).cloned()
    }

    // == Expire ==
    /// Marks every key matching any of `patterns` stale and clears its backoff.
    ///
    /// Returns the number of keys expired.
    pub fn expire<S: AsRef<str>>(&self, patterns: &[S]) -> Result<usize> {
        let matchers = pattern::compile_all(patterns)?;
        let count = self.with_state(|state, _| {
            let keys: Vec<String> = state
                .store
                .keys()
                .into_iter()
                .filter(|key| matchers.iter().any(|re| re.is_match(key)))
                .collect();

            for key in &keys {
                state.store.expire(key);
                state.backoff.clear(key);
            }
            keys.len()
        });

        info!(
            parent: &self.inner.span,
            patterns = ?patterns.iter().map(|p| p.as_ref()).collect::<Vec<&str>>(),
            count,
            "expired keys"
        );
        Ok(count)
    }

    // == Prune ==
    /// Evicts every entry older than the configured maximum age.
    pub fn prune(&self) -> usize {
        self.with_state(|state, now| state.store.prune(now))
    }

    // == Debug ==
    /// Diagnostic snapshot of the cache.
    pub fn debug(&self, options: DebugOptions) -> Result<DebugInfo<V>> {
        let search = options
            .search
            .as_deref()
            .map(pattern::compile)
            .transpose()?;

        let state = self.inner.state.lock();
        let now = self.inner.clock.now_ms();
        Ok(DebugInfo::collect(
            &self.inner.config,
            &state,
            search.as_ref(),
            options,
            now,
        ))
    }

    // == Disposers ==
    /// Registers a callback for every eviction from now on.
    pub fn add_disposer<F>(&self, disposer: F) -> DisposerId
    where
        F: Fn(&str, &CacheEntry<V>) + Send + Sync + 'static,
    {
        let id = DisposerId(self.inner.next_disposer.fetch_add(1, Ordering::Relaxed));
        self.inner.disposers.write().push((id, Arc::new(disposer)));
        id
    }

    /// Unregisters a disposer. Returns false if it was not registered.
    pub fn remove_disposer(&self, id: DisposerId) -> bool {
        let mut disposers = self.inner.disposers.write();
        let before = disposers.len();
        disposers.retain(|(registered, _)| *registered != id);
        disposers.len() != before
    }

    // == Accessors ==
    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().stats.clone()
    }

    /// The backoff record for a key, active or expired.
    pub fn backoff(&self, key: &str) -> Option<Backoff> {
        self.inner.state.lock().backoff.get(key)
    }

    /// Returns true while a worker for `key` is running.
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner.state.lock().jobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Current time according to the cache's clock.
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Span the cache logs under.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn core_with(max_length: usize) -> (CacheCore<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = CacheConfig {
            max_length,
            ..CacheConfig::default()
        };
        let core = CacheCore::new(config, clock.clone(), Span::none());
        (core, clock)
    }

    #[test]
    fn test_lookup_classifies() {
        let (core, clock) = core_with(10);
        assert!(core.lookup("N/A").is_none());

        core.set("hello", "world".to_string(), Some(Duration::from_secs(1)));
        assert_eq!(core.lookup("hello").unwrap().origin, Origin::Hit);

        clock.advance(Duration::from_secs(2));
        let stale = core.lookup("hello").unwrap();
        assert_eq!(stale.origin, Origin::Stale);
        assert_eq!(stale.value, "world");
    }

    #[test]
    fn test_disposer_called_once_per_eviction() {
        let (core, _) = core_with(2);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let id = core.add_disposer(move |key, entry: &CacheEntry<String>| {
            seen.lock().push((key.to_string(), entry.value.clone()));
        });
        let other_calls = Arc::new(Mutex::new(Vec::new()));
        let other_seen = other_calls.clone();
        core.add_disposer(move |key, _: &CacheEntry<String>| {
            other_seen.lock().push(key.to_string());
        });

        core.set("A", "a".into(), None);
        core.set("B", "b".into(), None);
        core.set("C", "c".into(), None);

        assert_eq!(core.keys(), vec!["C", "B"]);
        assert_eq!(*calls.lock(), vec![("A".to_string(), "a".to_string())]);
        assert_eq!(*other_calls.lock(), vec!["A".to_string()]);

        assert!(core.remove_disposer(id));
        assert!(!core.remove_disposer(id));
        core.set("D", "d".into(), None);
        assert_eq!(calls.lock().len(), 1);
        assert_eq!(*other_calls.lock(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(core.keys(), vec!["D", "C"]);
        assert_eq!(core.stats().evictions, 2);
    }

    #[test]
    fn test_del_and_clear_notify() {
        let (core, _) = core_with(10);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        core.add_disposer(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        core.set("a", "1".into(), None);
        core.set("b", "2".into(), None);
        core.set("c", "3".into(), None);

        assert!(core.del("a"));
        assert!(!core.del("a"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        core.clear();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(core.is_empty());
    }

    #[test]
    fn test_expire_matches_glob_only() {
        let (core, _) = core_with(10);
        core.set("house/1", "x".into(), None);
        core.set("house/2", "x".into(), None);
        core.set("guest/2", "x".into(), None);

        assert_eq!(core.expire(&["house/*"]).unwrap(), 2);

        assert_eq!(core.peek("house/1").unwrap().ttl, Duration::ZERO);
        assert_eq!(core.peek("house/2").unwrap().ttl, Duration::ZERO);
        assert_ne!(core.peek("guest/2").unwrap().ttl, Duration::ZERO);
        assert_eq!(core.lookup("house/1").unwrap().origin, Origin::Stale);
    }

    #[test]
    fn test_values_and_entries_follow_recency() {
        let (core, _) = core_with(10);
        core.set("a", "1".into(), None);
        core.set("b", "2".into(), None);
        core.lookup("a");

        assert_eq!(core.values(), vec!["1", "2"]);
        let entries = core.entries();
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].1.value, "2");
    }

    #[test]
    fn test_has_does_not_touch() {
        let (core, _) = core_with(2);
        core.set("a", "1".into(), None);
        core.set("b", "2".into(), None);
        assert!(core.has("a"));
        core.set("c", "3".into(), None);

        assert!(!core.has("a"));
        assert!(core.has("b"));
    }
}
