//! Stale Cache - an in-memory stale-while-revalidate cache
//!
//! Bounded LRU cache whose reads refill missing or stale entries through a
//! caller-supplied worker, serving the stale copy while a refresh runs or
//! after it fails. Middleware can wrap every operation; persistence and
//! distributed expiry ship as middleware. A small HTTP server exposes a
//! JSON cache for inspection.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, CacheBuilder, CacheEntry, GetOptions, Origin};
pub use config::{CacheConfig, Config};
pub use error::{CacheError, Result};
pub use middleware::{Middleware, Next};
pub use tasks::spawn_prune_task;
