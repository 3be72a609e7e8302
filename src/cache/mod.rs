//! Cache Module
//!
//! In-memory stale-while-revalidate cache: bounded LRU storage with TTL
//! freshness, single-flight workers, failure backoff and middleware hooks.

mod backoff;
mod clock;
mod coordinator;
mod debug;
mod entry;
mod facade;
mod freshness;
mod handle;
mod lru;
mod stats;
mod store;

pub mod pattern;


// Re-export public types
pub use backoff::{Backoff, BackoffTracker};
pub use clock::{current_timestamp_ms, duration_ms, Clock, ManualClock, SystemClock};
pub use coordinator::{GetOptions, Worker, WorkerFuture};
pub use debug::{DebugInfo, DebugKeys, DebugOptions, KeyInfo, WaitingInfo};
pub use entry::{CacheEntry, Origin};
pub use facade::{Cache, CacheBuilder};
pub use freshness::{is_fresh, is_waiting};
pub use handle::{CacheCore, Disposer, DisposerId};
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::{EntryStore, Eviction, EvictionReason};

/// Bound for values the cache can hold. Callers always receive clones.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}
