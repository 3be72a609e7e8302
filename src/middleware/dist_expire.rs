//! Distributed Expire Middleware
//!
//! Broadcasts every `expire` call on a message bus channel and applies the
//! expirations it receives from other instances sharing that channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheCore, CacheValue, DebugInfo, DebugOptions};
use crate::error::{CacheError, Result};
use crate::middleware::{Middleware, Next};

/// Message type tag of expire broadcasts.
pub const EXPIRE_MESSAGE_TYPE: &str = "EXPIRE_MESSAGE_TYPE";

// == Bus ==
/// Publish/subscribe transport carrying expire messages.
#[async_trait]
pub trait ExpireBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> anyhow::Result<()>;

    fn subscribe(&self, channel: &str) -> anyhow::Result<broadcast::Receiver<String>>;
}

/// In-process bus over tokio broadcast channels.
pub struct LocalBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalBus {
    /// Bus whose channels buffer up to `capacity` messages per receiver.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBus")
            .field("capacity", &self.capacity)
            .field("channels", &self.channels.lock().len())
            .finish()
    }
}

#[async_trait]
impl ExpireBus for LocalBus {
    async fn publish(&self, channel: &str, payload: String) -> anyhow::Result<()> {
        // no subscribers is not an error
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> anyhow::Result<broadcast::Receiver<String>> {
        Ok(self.sender(channel).subscribe())
    }
}

// == Messages ==
#[derive(Debug, Serialize, Deserialize)]
struct ExpireMessage {
    #[serde(rename = "type")]
    kind: String,
    message: ExpireKeys,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExpireKeys {
    keys: Vec<String>,
}

impl ExpireMessage {
    fn new(patterns: &[String]) -> Self {
        Self {
            kind: EXPIRE_MESSAGE_TYPE.to_string(),
            message: ExpireKeys {
                keys: patterns.to_vec(),
            },
        }
    }
}

// == Middleware ==
pub struct DistExpire<V> {
    core: CacheCore<V>,
    bus: Arc<dyn ExpireBus>,
    namespace: String,
    listener: Option<JoinHandle<()>>,
}

impl<V> fmt::Debug for DistExpire<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistExpire")
            .field("namespace", &self.namespace)
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

impl<V: CacheValue> DistExpire<V> {
    /// Subscribes to `namespace` and starts applying received expirations to
    /// `core`. If the subscription fails the middleware still publishes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        core: &CacheCore<V>,
        bus: Arc<dyn ExpireBus>,
        namespace: impl Into<String>,
    ) -> Arc<Self> {
        let namespace = namespace.into();

        let listener = match bus.subscribe(&namespace) {
            Ok(receiver) => {
                debug!(parent: core.span(), namespace = %namespace, "subscribed to expire messages");
                Some(tokio::spawn(listen(core.clone(), namespace.clone(), receiver)))
            }
            Err(err) => {
                error!(
                    parent: core.span(),
                    namespace = %namespace,
                    error = %err,
                    "failed to subscribe to expire messages"
                );
                None
            }
        };

        Arc::new(Self {
            core: core.clone(),
            bus,
            namespace,
            listener,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl<V> Drop for DistExpire<V> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn listen<V: CacheValue>(
    core: CacheCore<V>,
    namespace: String,
    mut receiver: broadcast::Receiver<String>,
) {
    loop {
        match receiver.recv().await {
            Ok(payload) => apply(&core, &namespace, &payload),
            Err(RecvError::Lagged(skipped)) => {
                warn!(parent: core.span(), namespace = %namespace, skipped, "expire listener lagged");
            }
            Err(RecvError::Closed) => {
                debug!(parent: core.span(), namespace = %namespace, "expire channel closed");
                break;
            }
        }
    }
}

fn apply<V: CacheValue>(core: &CacheCore<V>, namespace: &str, payload: &str) {
    let message: ExpireMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(err) => {
            error!(
                parent: core.span(),
                namespace = %namespace,
                payload = %payload,
                error = %err,
                "failed to parse expire message"
            );
            return;
        }
    };

    if message.kind != EXPIRE_MESSAGE_TYPE {
        debug!(parent: core.span(), kind = %message.kind, "ignoring message");
        return;
    }

    info!(
        parent: core.span(),
        namespace = %namespace,
        keys = ?message.message.keys,
        "received expire"
    );
    if let Err(err) = core.expire(&message.message.keys) {
        warn!(parent: core.span(), namespace = %namespace, error = %err, "failed to apply expire");
    }
}

#[async_trait]
impl<V: CacheValue> Middleware<V> for DistExpire<V> {
    async fn expire(&self, patterns: &[String], next: Next<'_, V>) -> Result<usize> {
        let payload = serde_json::to_string(&ExpireMessage::new(patterns))
            .map_err(|err| CacheError::Internal(err.to_string()))?;

        let bus = self.bus.clone();
        let namespace = self.namespace.clone();
        let span = self.core.span().clone();
        tokio::spawn(async move {
            if let Err(err) = bus.publish(&namespace, payload).await {
                error!(parent: &span, namespace = %namespace, error = %err, "failed to publish expire");
            }
        });

        next.expire(patterns).await
    }

    async fn debug(&self, options: DebugOptions, next: Next<'_, V>) -> Result<DebugInfo<V>> {
        next.debug(options.with_extra("namespace", self.namespace.clone()))
            .await
    }
}
