//! Configuration Module
//!
//! Cache tuning knobs and server settings, loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default freshness window: 24 hours.
pub const DEFAULT_CACHE_EXPIRE: Duration = Duration::from_secs(24 * 60 * 60);
/// Default backoff after a failed worker: 10 seconds.
pub const DEFAULT_DELTA_WAIT: Duration = Duration::from_secs(10);
/// Default worker timeout: 5 seconds.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(5);
/// Default capacity.
pub const DEFAULT_MAX_LENGTH: usize = 1000;
/// Default maximum entry age: twice the default TTL.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Cache parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Name used in log spans
    pub name: String,
    /// Maximum number of entries (0 = unbounded)
    pub max_length: usize,
    /// Age after which an entry is dropped regardless of use (zero = unbounded)
    pub max_age: Duration,
    /// TTL for `set` and `get` calls that don't pass one
    pub default_ttl: Duration,
    /// Time a worker may run before it counts as failed
    pub worker_timeout: Duration,
    /// Backoff armed after a worker failure
    pub delta_wait: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            max_age: DEFAULT_MAX_AGE,
            default_ttl: DEFAULT_CACHE_EXPIRE,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            delta_wait: DEFAULT_DELTA_WAIT,
        }
    }
}

impl CacheConfig {
    /// Loads cache parameters from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Span name (default: cache)
    /// - `MAX_LENGTH` - Maximum entries (default: 1000)
    /// - `MAX_AGE_MS` - Maximum entry age (default: 48h)
    /// - `DEFAULT_TTL_MS` - Default TTL (default: 24h)
    /// - `WORKER_TIMEOUT_MS` - Worker timeout (default: 5s)
    /// - `DELTA_WAIT_MS` - Backoff after failure (default: 10s)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: env::var("CACHE_NAME").unwrap_or(defaults.name),
            max_length: env_or("MAX_LENGTH", defaults.max_length),
            max_age: env_ms_or("MAX_AGE_MS", defaults.max_age),
            default_ttl: env_ms_or("DEFAULT_TTL_MS", defaults.default_ttl),
            worker_timeout: env_ms_or("WORKER_TIMEOUT_MS", defaults.worker_timeout),
            delta_wait: env_ms_or("DELTA_WAIT_MS", defaults.delta_wait),
        }
    }
}

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Parameters of the served cache
    pub cache: CacheConfig,
    /// HTTP server port
    pub server_port: u16,
    /// Background prune interval in seconds
    pub prune_interval: u64,
}

impl Config {
    /// Loads the server configuration from environment variables.
    ///
    /// On top of [`CacheConfig::from_env`]:
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `PRUNE_INTERVAL` - Prune frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            server_port: env_or("SERVER_PORT", 3000),
            prune_interval: env_or("PRUNE_INTERVAL", 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            server_port: 3000,
            prune_interval: 60,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_ms_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
