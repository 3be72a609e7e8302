//! Persistence Middleware
//!
//! Writes freshly produced entries to a key/value backend and reloads them
//! on startup, so a restarted process begins warm. Evicted entries are
//! deleted remotely. Backend failures are logged and never reach callers.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Span};

use crate::cache::{
    duration_ms, CacheCore, CacheEntry, CacheValue, DebugInfo, DebugOptions, DisposerId,
    GetOptions, Origin,
};
use crate::error::Result;
use crate::middleware::{Middleware, Next};

/// Extra lifetime given to remote records beyond the entry TTL: 24 hours.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

// == Backend ==
/// Remote key/value store holding persisted entries as JSON.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Stores `value` under `key`, expiring after `expire_secs`.
    async fn write(&self, key: &str, value: String, expire_secs: u64) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Deletes every record whose key starts with `prefix`, returning the count.
    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize>;

    /// Reads every record whose key starts with `prefix`.
    async fn load(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>>;
}

/// In-process backend. Expiry is recorded but not enforced.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, (String, u64)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored JSON and expiry for a key.
    pub fn record(&self, key: &str) -> Option<(String, u64)> {
        self.records.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>, expire_secs: u64) {
        self.records
            .lock()
            .insert(key.into(), (value.into(), expire_secs));
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn write(&self, key: &str, value: String, expire_secs: u64) -> anyhow::Result<()> {
        self.insert(key, value, expire_secs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|key, _| !key.starts_with(prefix));
        Ok(before - records.len())
    }

    async fn load(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect())
    }
}

// == Options ==
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    /// Distinguishes caches sharing one backend
    pub key_space: String,
    /// Keys matching this are never written
    pub do_not_persist: Option<Regex>,
    /// Added to the TTL to get the remote expiry
    pub grace: Duration,
    /// Load persisted entries when attached
    pub bootload: bool,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            key_space: String::new(),
            do_not_persist: None,
            grace: DEFAULT_GRACE,
            bootload: true,
        }
    }
}

/// Wire format of a persisted entry. `ttl` is in milliseconds.
#[derive(Debug, Serialize, Deserialize)]
struct Record<T> {
    created: u64,
    ttl: u64,
    value: T,
    cache: Origin,
}

// == Persistence ==
pub struct Persistence<V> {
    core: CacheCore<V>,
    backend: Arc<dyn PersistenceBackend>,
    prefix: String,
    options: PersistenceOptions,
    persisting: Mutex<HashSet<String>>,
    disposer: DisposerId,
}

impl<V> fmt::Debug for Persistence<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence")
            .field("prefix", &self.prefix)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<V> Persistence<V>
where
    V: CacheValue + Serialize + DeserializeOwned,
{
    /// Attaches to `core`: registers the remote-delete disposer and, with
    /// `bootload`, starts loading persisted entries in the background.
    ///
    /// Must be called from within a tokio runtime when `bootload` is set.
    pub fn new(
        core: &CacheCore<V>,
        backend: Arc<dyn PersistenceBackend>,
        options: PersistenceOptions,
    ) -> Arc<Self> {
        let prefix = format!("{}-{}", env!("CARGO_PKG_NAME"), options.key_space);
        let disposer = core.add_disposer(remote_delete(
            backend.clone(),
            prefix.clone(),
            core.span().clone(),
        ));

        let persistence = Arc::new(Self {
            core: core.clone(),
            backend,
            prefix,
            options,
            persisting: Mutex::new(HashSet::new()),
            disposer,
        });

        if persistence.options.bootload {
            let loader = persistence.clone();
            tokio::spawn(async move {
                loader.load().await;
            });
        }

        persistence
    }

    /// Prefix shared by every remote key of this cache.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remote key for a cache key.
    pub fn remote_key(&self, key: &str) -> String {
        remote_key(&self.prefix, key)
    }

    fn local_key<'a>(&self, remote: &'a str) -> Option<&'a str> {
        remote
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
    }

    /// Stops deleting remote records on eviction.
    pub fn detach(&self) -> bool {
        self.core.remove_disposer(self.disposer)
    }

    async fn persist(&self, key: &str, entry: &CacheEntry<V>) {
        if let Some(re) = &self.options.do_not_persist {
            if re.is_match(key) {
                debug!(parent: self.core.span(), key = %key, "skipping persistence");
                return;
            }
        }

        let Some(_claim) = Claim::acquire(&self.persisting, key) else {
            debug!(parent: self.core.span(), key = %key, "already persisting");
            return;
        };

        let remote = self.remote_key(key);
        let record = Record {
            created: entry.created_at,
            ttl: duration_ms(entry.ttl),
            value: &entry.value,
            cache: entry.origin,
        };
        let expire_secs =
            duration_ms(entry.ttl.saturating_add(self.options.grace)).saturating_add(500) / 1000;

        match serde_json::to_string(&record) {
            Ok(json) => match self.backend.write(&remote, json, expire_secs).await {
                Ok(()) => debug!(parent: self.core.span(), key = %remote, expire_secs, "persisted"),
                Err(err) => warn!(
                    parent: self.core.span(),
                    key = %remote,
                    error = %err,
                    "failed to persist entry"
                ),
            },
            Err(err) => warn!(
                parent: self.core.span(),
                key = %key,
                error = %err,
                "entry is not serializable"
            ),
        }
    }

    // == Load ==
    /// Reads persisted entries into the cache, newest first up to the cache
    /// capacity. Records beyond the capacity are deleted remotely. Each
    /// entry keeps the TTL it had left.
    ///
    /// Returns the number of entries loaded.
    pub async fn load(&self) -> usize {
        let started = Instant::now();
        let span = self.core.span();
        let scan_prefix = format!("{}-", self.prefix);

        let raw = match self.backend.load(&scan_prefix).await {
            Ok(raw) => raw,
            Err(err) => {
                error!(parent: span, prefix = %self.prefix, error = %err, "failed to load entries");
                return 0;
            }
        };

        let mut records: Vec<(String, Record<V>)> = raw
            .into_iter()
            .filter_map(|(remote, json)| {
                let key = self.local_key(&remote)?.to_string();
                match serde_json::from_str(&json) {
                    Ok(record) => Some((key, record)),
                    Err(err) => {
                        warn!(parent: span, key = %remote, error = %err, "could not parse record");
                        None
                    }
                }
            })
            .collect();
        records.sort_by_key(|(_, record)| Reverse(record.created));

        let max_length = self.core.config().max_length;
        if max_length > 0 && records.len() > max_length {
            for (key, _) in records.split_off(max_length) {
                let remote = self.remote_key(&key);
                if let Err(err) = self.backend.delete(&remote).await {
                    warn!(parent: span, key = %remote, error = %err, "failed to delete record");
                }
            }
        }

        let now = self.core.now_ms();
        let count = records.len();
        // oldest first so the newest ends up most recently used
        for (key, record) in records.into_iter().rev() {
            let elapsed = now.saturating_sub(record.created);
            let ttl = Duration::from_millis(record.ttl.saturating_sub(elapsed));
            self.core.set(&key, record.value, Some(ttl));
        }

        info!(
            parent: span,
            count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded persisted entries"
        );
        count
    }
}

/// Marks a key as being written. Released on drop, so a cancelled `get`
/// does not block later writes for the key.
struct Claim<'a> {
    persisting: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> Claim<'a> {
    fn acquire(persisting: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        if !persisting.lock().insert(key.to_string()) {
            return None;
        }
        Some(Self {
            persisting,
            key: key.to_string(),
        })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.persisting.lock().remove(&self.key);
    }
}

fn remote_key(prefix: &str, key: &str) -> String {
    format!("{prefix}-{key}")
}

/// Disposer deleting the remote record of every evicted key.
fn remote_delete<V: 'static>(
    backend: Arc<dyn PersistenceBackend>,
    prefix: String,
    span: Span,
) -> impl Fn(&str, &CacheEntry<V>) + Send + Sync + 'static {
    move |key, _| {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(parent: &span, key = %key, "no runtime, remote record kept");
            return;
        };

        let backend = backend.clone();
        let span = span.clone();
        let remote = remote_key(&prefix, key);
        runtime.spawn(async move {
            match backend.delete(&remote).await {
                Ok(()) => debug!(parent: &span, key = %remote, "deleted evicted record"),
                Err(err) => error!(parent: &span, key = %remote, error = %err, "failed to delete record"),
            }
        });
    }
}

#[async_trait]
impl<V> Middleware<V> for Persistence<V>
where
    V: CacheValue + Serialize + DeserializeOwned,
{
    async fn get(
        &self,
        key: &str,
        options: GetOptions<V>,
        next: Next<'_, V>,
    ) -> Result<CacheEntry<V>> {
        let entry = next.get(key, options).await?;
        if entry.origin == Origin::Miss {
            self.persist(key, &entry).await;
        }
        Ok(entry)
    }

    async fn clear(&self, next: Next<'_, V>) {
        let prefix = format!("{}-", self.prefix);
        match self.backend.delete_prefix(&prefix).await {
            Ok(count) => debug!(parent: self.core.span(), prefix = %self.prefix, count, "cleared records"),
            Err(err) => error!(
                parent: self.core.span(),
                prefix = %self.prefix,
                error = %err,
                "failed to clear records"
            ),
        }
        next.clear().await
    }

    async fn debug(&self, options: DebugOptions, next: Next<'_, V>) -> Result<DebugInfo<V>> {
        next.debug(options.with_extra("cache_key_prefix", self.prefix.clone()))
            .await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::CacheConfig;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: u64 = 1_000_000;

    struct Fixture {
        core: CacheCore<String>,
        backend: Arc<MemoryBackend>,
        persistence: Arc<Persistence<String>>,
        chain: Vec<Arc<dyn Middleware<String>>>,
    }

    impl Fixture {
        fn new(max_length: usize, options: PersistenceOptions) -> Self {
            let clock = Arc::new(ManualClock::new(NOW));
            let config = CacheConfig {
                max_length,
                ..CacheConfig::default()
            };
            let core = CacheCore::new(config, clock, Span::none());
            let backend = Arc::new(MemoryBackend::new());
            let persistence = Persistence::new(&core, backend.clone(), options);
            let chain: Vec<Arc<dyn Middleware<String>>> = vec![persistence.clone()];
            Self {
                core,
                backend,
                persistence,
                chain,
            }
        }

        fn next(&self) -> Next<'_, String> {
            Next::new(&self.core, &self.chain)
        }
    }

    fn options(key_space: &str) -> PersistenceOptions {
        PersistenceOptions {
            key_space: key_space.to_string(),
            bootload: false,
            ..PersistenceOptions::default()
        }
    }

    fn produce(value: &str) -> GetOptions<String> {
        let value = value.to_string();
        GetOptions::new()
            .ttl(Duration::from_secs(1))
            .worker(move || async move { anyhow::Ok(value) })
    }

    async fn drain_tasks() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_miss_is_persisted() {
        let fx = Fixture::new(10, options("test"));

        let entry = fx.next().get("hello", produce("world")).await.unwrap();
        assert_eq!(entry.origin, Origin::Miss);

        let (json, expire_secs) = fx.backend.record("stale_cache-test-hello").unwrap();
        let record: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(record["value"], "world");
        assert_eq!(record["created"], NOW);
        assert_eq!(record["ttl"], 1000);
        assert_eq!(record["cache"], "miss");
        assert_eq!(expire_secs, 86_401);
    }

    #[tokio::test]
    async fn test_hit_is_not_persisted() {
        let fx = Fixture::new(10, options("test"));
        fx.core.set("hello", "world".to_string(), None);

        let entry = fx.next().get("hello", produce("other")).await.unwrap();

        assert_eq!(entry.origin, Origin::Hit);
        assert!(fx.backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_do_not_persist() {
        let fx = Fixture::new(
            10,
            PersistenceOptions {
                do_not_persist: Some(Regex::new("^private/").unwrap()),
                ..options("test")
            },
        );

        fx.next().get("private/1", produce("secret")).await.unwrap();
        fx.next().get("public/1", produce("open")).await.unwrap();

        assert_eq!(fx.backend.keys(), vec!["stale_cache-test-public/1"]);
    }

    #[tokio::test]
    async fn test_eviction_deletes_remote_record() {
        let fx = Fixture::new(10, options("test"));
        fx.next().get("hello", produce("world")).await.unwrap();
        assert_eq!(fx.backend.keys().len(), 1);

        assert!(fx.next().del("hello").await);
        drain_tasks().await;

        assert!(fx.backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_detach_keeps_remote_records() {
        let fx = Fixture::new(10, options("test"));
        fx.next().get("hello", produce("world")).await.unwrap();

        assert!(fx.persistence.detach());
        fx.core.del("hello");
        drain_tasks().await;

        assert_eq!(fx.backend.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_deletes_key_space_only() {
        let fx = Fixture::new(10, options("test"));
        fx.backend.insert("stale_cache-other-hello", "{}", 10);
        fx.next().get("hello", produce("world")).await.unwrap();

        fx.next().clear().await;

        assert!(fx.core.is_empty());
        assert_eq!(fx.backend.keys(), vec!["stale_cache-other-hello"]);
    }

    #[tokio::test]
    async fn test_debug_reports_prefix() {
        let fx = Fixture::new(10, options("test"));

        let info = fx.next().debug(DebugOptions::new()).await.unwrap();

        assert_eq!(info.extra["cache_key_prefix"], "stale_cache-test");
        assert_eq!(fx.persistence.prefix(), "stale_cache-test");
    }

    #[tokio::test]
    async fn test_load_keeps_newest_and_remaining_ttl() {
        let fx = Fixture::new(2, options("test"));
        let record = |created: u64, ttl: u64, value: &str| {
            format!(r#"{{"created":{created},"ttl":{ttl},"value":"{value}","cache":"miss"}}"#)
        };
        fx.backend.insert("stale_cache-test-old", record(NOW - 5_000, 60_000, "a"), 10);
        fx.backend.insert("stale_cache-test-mid", record(NOW - 2_000, 1_000, "b"), 10);
        fx.backend.insert("stale_cache-test-new", record(NOW - 1_000, 60_000, "c"), 10);
        fx.backend.insert("stale_cache-test-broken", "not json", 10);
        fx.backend.insert("stale_cache-elsewhere-x", record(NOW, 60_000, "x"), 10);

        let loaded = fx.persistence.load().await;

        assert_eq!(loaded, 2);
        assert_eq!(fx.core.keys(), vec!["new", "mid"]);
        assert_eq!(fx.core.peek("new").unwrap().ttl, Duration::from_millis(59_000));
        assert_eq!(fx.core.peek("mid").unwrap().ttl, Duration::ZERO);
        assert_eq!(fx.core.lookup("mid").unwrap().origin, Origin::Stale);
        assert!(fx.backend.record("stale_cache-test-old").is_none());
        assert!(fx.backend.record("stale_cache-test-broken").is_some());
        assert!(fx.backend.record("stale_cache-elsewhere-x").is_some());
    }

    /// Backend whose first write never completes.
    #[derive(Default)]
    struct StuckFirstWrite {
        writes: AtomicUsize,
        inner: MemoryBackend,
    }

    #[async_trait]
    impl PersistenceBackend for StuckFirstWrite {
        async fn write(&self, key: &str, value: String, expire_secs: u64) -> anyhow::Result<()> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            self.inner.write(key, value, expire_secs).await
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.inner.delete(key).await
        }

        async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
            self.inner.delete_prefix(prefix).await
        }

        async fn load(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
            self.inner.load(prefix).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_write_does_not_block_later_writes() {
        let clock = Arc::new(ManualClock::new(NOW));
        let core: CacheCore<String> =
            CacheCore::new(CacheConfig::default(), clock.clone(), Span::none());
        let backend = Arc::new(StuckFirstWrite::default());
        let persistence = Persistence::new(&core, backend.clone(), options("test"));
        let chain: Vec<Arc<dyn Middleware<String>>> = vec![persistence];
        let next = Next::new(&core, &chain);

        let first = GetOptions::new()
            .ttl(Duration::from_millis(1))
            .worker(|| async { anyhow::Ok("v1".to_string()) });
        let cancelled = tokio::time::timeout(Duration::from_millis(50), next.get("k", first)).await;
        assert!(cancelled.is_err());

        clock.advance(Duration::from_millis(2));
        let entry = next.get("k", produce("v2")).await.unwrap();
        assert_eq!(entry.origin, Origin::Miss);

        assert_eq!(backend.writes.load(Ordering::SeqCst), 2);
        let (json, _) = backend.inner.record("stale_cache-test-k").unwrap();
        let record: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(record["value"], "v2");
    }

    #[tokio::test]
    async fn test_bootload_on_attach() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert(
            "stale_cache-boot-hello",
            format!(r#"{{"created":{NOW},"ttl":60000,"value":"world","cache":"miss"}}"#),
            10,
        );
        let clock = Arc::new(ManualClock::new(NOW));
        let core: CacheCore<String> =
            CacheCore::new(CacheConfig::default(), clock, Span::none());

        let _persistence = Persistence::new(
            &core,
            backend,
            PersistenceOptions {
                key_space: "boot".to_string(),
                ..PersistenceOptions::default()
            },
        );
        drain_tasks().await;

        assert_eq!(core.peek("hello").unwrap().value, "world");
    }
}
