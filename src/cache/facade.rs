//! Cache Facade
//!
//! [`Cache`] is the handle applications use: wrappable operations go through
//! the middleware chain, everything else goes straight to the core.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, Span};

use crate::cache::{
    Backoff, CacheCore, CacheEntry, CacheStats, CacheValue, Clock, DebugInfo, DebugOptions,
    DisposerId, GetOptions, SystemClock,
};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::middleware::{Middleware, Next};

type Factory<V> = Box<dyn FnOnce(&CacheCore<V>) -> Arc<dyn Middleware<V>>>;

// == Cache ==
/// Cheaply cloneable cache handle.
pub struct Cache<V> {
    core: CacheCore<V>,
    chain: Arc<[Arc<dyn Middleware<V>>]>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("core", &self.core)
            .field("middlewares", &self.chain.len())
            .finish()
    }
}

impl<V: CacheValue> Cache<V> {
    /// Cache with the given config, the system clock and no middleware.
    pub fn new(config: CacheConfig) -> Self {
        CacheBuilder::new(config).build()
    }

    pub fn builder(config: CacheConfig) -> CacheBuilder<V> {
        CacheBuilder::new(config)
    }

    fn next(&self) -> Next<'_, V> {
        Next::new(&self.core, &self.chain)
    }

    // == Wrapped Operations ==
    /// See [`CacheCore::get`].
    pub async fn get(&self, key: &str, options: GetOptions<V>) -> Result<CacheEntry<V>> {
        self.next().get(key, options).await
    }

    /// Stores a value. `None` uses the configured default TTL.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.next().set(key, value, ttl).await
    }

    pub async fn del(&self, key: &str) -> bool {
        self.next().del(key).await
    }

    pub async fn clear(&self) {
        self.next().clear().await
    }

    /// Marks every key matching one of `patterns` stale. `*` is a wildcard.
    pub async fn expire<S: AsRef<str>>(&self, patterns: &[S]) -> Result<usize> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self.next().expire(&patterns).await
    }

    pub async fn debug(&self, options: DebugOptions) -> Result<DebugInfo<V>> {
        self.next().debug(options).await
    }

    // == Direct Operations ==
    pub fn lookup(&self, key: &str) -> Option<CacheEntry<V>> {
        self.core.lookup(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.core.has(key)
    }

    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.core.peek(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.core.keys()
    }

    pub fn values(&self) -> Vec<V> {
        self.core.values()
    }

    pub fn entries(&self) -> Vec<(String, CacheEntry<V>)> {
        self.core.entries()
    }

    pub fn prune(&self) -> usize {
        self.core.prune()
    }

    pub fn add_disposer<F>(&self, disposer: F) -> DisposerId
    where
        F: Fn(&str, &CacheEntry<V>) + Send + Sync + 'static,
    {
        self.core.add_disposer(disposer)
    }

    pub fn remove_disposer(&self, id: DisposerId) -> bool {
        self.core.remove_disposer(id)
    }

    pub fn stats(&self) -> CacheStats {
        self.core.stats()
    }

    pub fn backoff(&self, key: &str) -> Option<Backoff> {
        self.core.backoff(key)
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        self.core.config()
    }

    /// The cache below the middleware chain.
    pub fn core(&self) -> &CacheCore<V> {
        &self.core
    }
}

// == Builder ==
/// Assembles a [`Cache`]. Middleware is fixed once [`CacheBuilder::build`] runs.
pub struct CacheBuilder<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    span: Option<Span>,
    initial: Vec<(String, V)>,
    factories: Vec<Factory<V>>,
}

impl<V: CacheValue> CacheBuilder<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            span: None,
            initial: Vec::new(),
            factories: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Span the cache logs under. Defaults to a `cache` span carrying the
    /// configured name.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Values inserted with the default TTL before any middleware is attached.
    pub fn initial<K, I>(mut self, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.initial
            .extend(values.into_iter().map(|(key, value)| (key.into(), value)));
        self
    }

    /// Attaches a middleware. The factory runs during `build` with the core
    /// cache, whose operations bypass the chain.
    pub fn with_middleware<F, M>(mut self, factory: F) -> Self
    where
        F: FnOnce(&CacheCore<V>) -> Arc<M> + 'static,
        M: Middleware<V> + 'static,
    {
        self.factories.push(Box::new(move |core: &CacheCore<V>| {
            let middleware: Arc<dyn Middleware<V>> = factory(core);
            middleware
        }));
        self
    }

    pub fn build(self) -> Cache<V> {
        let span = match self.span {
            Some(span) => span,
            None => info_span!("cache", name = %self.config.name),
        };
        let core = CacheCore::new(self.config, self.clock, span);

        for (key, value) in self.initial {
            core.set(&key, value, None);
        }

        let chain: Vec<Arc<dyn Middleware<V>>> =
            self.factories.into_iter().map(|factory| factory(&core)).collect();

        info!(
            parent: core.span(),
            entries = core.len(),
            middlewares = chain.len(),
            "cache ready"
        );

        Cache {
            core,
            chain: chain.into(),
        }
    }
}
