//! Middleware Module
//!
//! Hooks that wrap the cache operations `get`, `set`, `del`, `clear`,
//! `expire` and `debug`. Each hook receives a [`Next`] continuation that
//! runs the rest of the chain and finally the core operation, so a
//! middleware can act before or after it, change its arguments or result,
//! or skip it altogether.
//!
//! Middlewares are attached with [`CacheBuilder::with_middleware`]; the last
//! one attached is the outermost.
//!
//! [`CacheBuilder::with_middleware`]: crate::cache::CacheBuilder::with_middleware

pub mod dist_expire;
pub mod persistence;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheCore, CacheEntry, CacheValue, DebugInfo, DebugOptions, GetOptions};
use crate::error::Result;

pub use dist_expire::{DistExpire, ExpireBus, LocalBus, EXPIRE_MESSAGE_TYPE};
pub use persistence::{MemoryBackend, Persistence, PersistenceBackend, PersistenceOptions};

// == Middleware Trait ==
/// Interposes on cache operations. Every method passes through by default,
/// so implementors only override what they need.
#[async_trait]
pub trait Middleware<V: CacheValue>: Send + Sync {
    async fn get(
        &self,
        key: &str,
        options: GetOptions<V>,
        next: Next<'_, V>,
    ) -> Result<CacheEntry<V>> {
        next.get(key, options).await
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>, next: Next<'_, V>) {
        next.set(key, value, ttl).await
    }

    async fn del(&self, key: &str, next: Next<'_, V>) -> bool {
        next.del(key).await
    }

    async fn clear(&self, next: Next<'_, V>) {
        next.clear().await
    }

    async fn expire(&self, patterns: &[String], next: Next<'_, V>) -> Result<usize> {
        next.expire(patterns).await
    }

    async fn debug(&self, options: DebugOptions, next: Next<'_, V>) -> Result<DebugInfo<V>> {
        next.debug(options).await
    }
}

// == Continuation ==
/// The remainder of the middleware chain, ending at the core.
pub struct Next<'a, V> {
    core: &'a CacheCore<V>,
    chain: &'a [Arc<dyn Middleware<V>>],
}

impl<V> Clone for Next<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Next<'_, V> {}

impl<'a, V: CacheValue> Next<'a, V> {
    /// Continuation over `chain`, outermost middleware last.
    pub fn new(core: &'a CacheCore<V>, chain: &'a [Arc<dyn Middleware<V>>]) -> Self {
        Self { core, chain }
    }

    /// The un-wrapped cache below the chain.
    pub fn core(&self) -> &'a CacheCore<V> {
        self.core
    }

    fn split(self) -> Option<(&'a Arc<dyn Middleware<V>>, Self)> {
        let (outer, rest) = self.chain.split_last()?;
        Some((
            outer,
            Self {
                core: self.core,
                chain: rest,
            },
        ))
    }

    pub async fn get(self, key: &str, options: GetOptions<V>) -> Result<CacheEntry<V>> {
        match self.split() {
            Some((outer, next)) => outer.get(key, options, next).await,
            None => self.core.get(key, options).await,
        }
    }

    pub async fn set(self, key: &str, value: V, ttl: Option<Duration>) {
        match self.split() {
            Some((outer, next)) => outer.set(key, value, ttl, next).await,
            None => self.core.set(key, value, ttl),
        }
    }

    pub async fn del(self, key: &str) -> bool {
        match self.split() {
            Some((outer, next)) => outer.del(key, next).await,
            None => self.core.del(key),
        }
    }

    pub async fn clear(self) {
        match self.split() {
            Some((outer, next)) => outer.clear(next).await,
            None => self.core.clear(),
        }
    }

    pub async fn expire(self, patterns: &[String]) -> Result<usize> {
        match self.split() {
            Some((outer, next)) => outer.expire(patterns, next).await,
            None => self.core.expire(patterns),
        }
    }

    pub async fn debug(self, options: DebugOptions) -> Result<DebugInfo<V>> {
        match self.split() {
            Some((outer, next)) => outer.debug(options, next).await,
            None => self.core.debug(options),
        }
    }
}
