//! Prune Task
//!
//! Background task that periodically drops entries older than the cache's
//! maximum age, so they do not linger until their next read.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Cache, CacheValue};

/// Spawns a background task that prunes aged entries every
/// `prune_interval_secs` seconds. Disposers fire for every pruned entry.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache: Cache<String> = Cache::new(CacheConfig::default());
/// let prune_handle = spawn_prune_task(cache.clone(), 60);
/// // Later, during shutdown:
/// prune_handle.abort();
/// ```
pub fn spawn_prune_task<V: CacheValue>(cache: Cache<V>, prune_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(prune_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            parent: cache.core().span(),
            interval_secs = interval.as_secs(),
            "starting prune task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.prune();
            if removed > 0 {
                info!(parent: cache.core().span(), removed, "pruned aged entries");
            } else {
                debug!(parent: cache.core().span(), "no aged entries to prune");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::CacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn aged_cache() -> (Cache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig {
            max_age: Duration::from_secs(10),
            ..CacheConfig::default()
        };
        let cache = Cache::builder(config).with_clock(clock.clone()).build();
        (cache, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_task_removes_aged_entries() {
        let (cache, clock) = aged_cache();
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        cache.add_disposer(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cache.set("old", "value".to_string(), None).await;
        clock.advance(Duration::from_secs(5));
        cache.set("young", "value".to_string(), None).await;
        clock.advance(Duration::from_secs(6));

        let handle = spawn_prune_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(cache.keys(), vec!["young"]);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_task_keeps_stale_entries() {
        let (cache, clock) = aged_cache();
        cache
            .set("stale", "value".to_string(), Some(Duration::from_secs(1)))
            .await;
        clock.advance(Duration::from_secs(2));

        let handle = spawn_prune_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(cache.has("stale"));
        handle.abort();
    }

    #[tokio::test]
    async fn test_prune_task_can_be_aborted() {
        let (cache, _) = aged_cache();

        let handle = spawn_prune_task(cache, 1);
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
