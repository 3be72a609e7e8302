//! Fetch Coordinator
//!
//! Decides for every read whether to serve the cached entry, serve it stale,
//! join a running worker, start one, or reject because a recent failure is
//! still backing off. At most one worker runs per key; every caller that
//! arrives while it runs shares its outcome.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error};

use crate::cache::clock::duration_ms;
use crate::cache::freshness::{is_fresh, is_waiting};
use crate::cache::handle::CacheCore;
use crate::cache::{CacheEntry, CacheValue, Origin};
use crate::error::{CacheError, Result};

/// A running worker, shared by every caller waiting on the key.
pub(super) type Job<V> = Shared<BoxFuture<'static, Result<CacheEntry<V>>>>;

/// Future produced by a [`Worker`].
pub type WorkerFuture<V> = BoxFuture<'static, anyhow::Result<V>>;

// == Worker ==
/// Caller-supplied producer that computes or fetches a value.
pub struct Worker<V> {
    run: Box<dyn FnOnce() -> WorkerFuture<V> + Send>,
}

impl<V: 'static> Worker<V> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self {
            run: Box::new(move || f().boxed()),
        }
    }

    fn call(self) -> WorkerFuture<V> {
        (self.run)()
    }
}

impl<V> fmt::Debug for Worker<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Worker")
    }
}

// == Get Options ==
/// Per-call settings for `get`. Unset durations fall back to the cache config.
pub struct GetOptions<V> {
    pub ttl: Option<Duration>,
    pub worker_timeout: Option<Duration>,
    pub delta_wait: Option<Duration>,
    pub worker: Option<Worker<V>>,
}

impl<V> Default for GetOptions<V> {
    fn default() -> Self {
        Self {
            ttl: None,
            worker_timeout: None,
            delta_wait: None,
            worker: None,
        }
    }
}

impl<V> fmt::Debug for GetOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOptions")
            .field("ttl", &self.ttl)
            .field("worker_timeout", &self.worker_timeout)
            .field("delta_wait", &self.delta_wait)
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl<V: 'static> GetOptions<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = Some(timeout);
        self
    }

    pub fn delta_wait(mut self, wait: Duration) -> Self {
        self.delta_wait = Some(wait);
        self
    }

    /// Sets the worker that refills the key on a miss or when stale.
    pub fn worker<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.worker = Some(Worker::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct JobSpec {
    ttl: Duration,
    timeout: Duration,
    delta_wait: Duration,
}

enum Decision<V> {
    Ready(Result<CacheEntry<V>>),
    Join {
        job: Job<V>,
        origin: Origin,
        fallback: Option<CacheEntry<V>>,
    },
}

impl<V: CacheValue> CacheCore<V> {
    // == Get ==
    /// Reads a key, running the worker from `options` when the entry is
    /// missing or stale.
    ///
    /// Without a worker this is [`CacheCore::lookup`] with absence mapped to
    /// [`CacheError::NotFound`]. With one, the decision is made in order:
    /// 1. fresh and not backing off: `hit`
    /// 2. cached while backing off: `stale`
    /// 3. absent while backing off: [`CacheError::Waiting`]
    /// 4. otherwise join the running worker (`hit`) or start one (`miss`)
    ///
    /// A failed worker arms the backoff window; callers with a cached entry
    /// then get it back as `stale`, the rest get the worker's error.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn get(&self, key: &str, options: GetOptions<V>) -> Result<CacheEntry<V>> {
        let GetOptions {
            ttl,
            worker_timeout,
            delta_wait,
            worker,
        } = options;

        let Some(worker) = worker else {
            return self
                .lookup(key)
                .ok_or_else(|| CacheError::NotFound(key.to_string()));
        };

        let config = &self.inner.config;
        let spec = JobSpec {
            ttl: ttl.unwrap_or(config.default_ttl),
            timeout: worker_timeout.unwrap_or(config.worker_timeout),
            delta_wait: delta_wait.unwrap_or(config.delta_wait),
        };

        let decision = self.with_state(|state, now| {
            let cached = state.store.get(key, now);
            let backoff = state
                .backoff
                .get(key)
                .filter(|record| is_waiting(Some(record), now));

            match (&cached, backoff) {
                (Some(entry), None) if is_fresh(entry, now) => {
                    state.stats.record_hit();
                    return Decision::Ready(Ok(entry.clone().with_origin(Origin::Hit)));
                }
                (Some(entry), Some(_)) => {
                    state.stats.record_stale();
                    return Decision::Ready(Ok(entry.clone().with_origin(Origin::Stale)));
                }
                (None, Some(backoff)) => {
                    return Decision::Ready(Err(CacheError::Waiting {
                        key: key.to_string(),
                        backoff,
                    }));
                }
                _ => {}
            }

            let (job, origin) = match state.jobs.get(key) {
                Some(job) => (job.clone(), Origin::Hit),
                None => {
                    state.stats.record_miss();
                    // the task cannot settle before this closure releases the lock
                    let job = self.spawn_job(key, worker, spec);
                    state.jobs.insert(key.to_string(), job.clone());
                    (job, Origin::Miss)
                }
            };

            Decision::Join {
                job,
                origin,
                fallback: cached,
            }
        });

        let (job, origin, fallback) = match decision {
            Decision::Ready(result) => return result,
            Decision::Join {
                job,
                origin,
                fallback,
            } => (job, origin, fallback),
        };

        match job.await {
            Ok(entry) => {
                if origin == Origin::Hit {
                    self.inner.state.lock().stats.record_hit();
                }
                Ok(entry.with_origin(origin))
            }
            Err(err) => match fallback {
                Some(stale) => {
                    self.inner.state.lock().stats.record_stale();
                    Ok(stale.with_origin(Origin::Stale))
                }
                None => Err(err),
            },
        }
    }

    /// Starts the worker on its own task so the outcome is recorded even if
    /// every waiting caller goes away.
    fn spawn_job(&self, key: &str, worker: Worker<V>, spec: JobSpec) -> Job<V> {
        debug!(parent: &self.inner.span, key = %key, "starting worker");

        let core = self.clone();
        let key = key.to_string();
        let handle = tokio::spawn(async move {
            let outcome = run_worker(&key, worker, spec.timeout).await;
            core.settle(&key, outcome, spec)
        });

        async move {
            handle
                .await
                .unwrap_or_else(|err| Err(CacheError::Internal(format!("refresh task failed: {err}"))))
        }
        .boxed()
        .shared()
    }

    /// Records a worker outcome. The job is removed in the same critical
    /// section, so the next read starts a fresh decision.
    fn settle(&self, key: &str, outcome: Result<V>, spec: JobSpec) -> Result<CacheEntry<V>> {
        match outcome {
            Ok(value) => self.with_state(|state, now| {
                state.jobs.remove(key);
                state.backoff.clear(key);
                Ok(state.store.set(key, value, spec.ttl, now))
            }),
            Err(err) => {
                error!(
                    parent: &self.inner.span,
                    key = %key,
                    error = %err,
                    backoff_ms = duration_ms(spec.delta_wait),
                    "worker failed"
                );
                self.with_state(|state, now| {
                    state.jobs.remove(key);
                    state.backoff.set(key, spec.delta_wait, now);
                    state.stats.record_failure();
                });
                Err(err)
            }
        }
    }
}

/// Runs a worker on a separate task bounded by `timeout`. Panics count as
/// worker failures; a timed-out worker is aborted.
async fn run_worker<V: CacheValue>(key: &str, worker: Worker<V>, timeout: Duration) -> Result<V> {
    let mut task = tokio::spawn(async move { worker.call().await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(CacheError::Worker {
            key: key.to_string(),
            message: format!("{err:#}"),
        }),
        Ok(Err(join_err)) => Err(CacheError::Worker {
            key: key.to_string(),
            message: join_err.to_string(),
        }),
        Err(_) => {
            task.abort();
            Err(CacheError::Timeout {
                key: key.to_string(),
                timeout_ms: duration_ms(timeout),
            })
        }
    }
}
