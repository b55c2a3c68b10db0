//! Best-effort distributed cache tier shared across processes.
//!
//! The adapter mirrors the local tier's get/set surface against an external
//! key-value service and adds a publish/subscribe primitive for cross-process
//! event delivery. Every operation is typed internally; the `*_best_effort`
//! surface degrades silently so callers can always fall back to the local
//! tier or the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::CacheError;

/// Configuration for the remote cache tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Address of the external cache service.
    pub url: String,
    /// Prefix namespacing every key written by this layer.
    pub key_prefix: String,
    /// Identity attached to published events; subscribers drop their own.
    pub instance_id: String,
    /// TTL in seconds for [`TtlClass::Short`].
    pub ttl_short_seconds: u64,
    /// TTL in seconds for [`TtlClass::Medium`].
    pub ttl_medium_seconds: u64,
    /// TTL in seconds for [`TtlClass::Long`].
    pub ttl_long_seconds: u64,
}

impl Default for RemoteCacheConfig {
    /// Default remote tier settings.
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "mnemo".to_string(),
            instance_id: Uuid::new_v4().to_string(),
            ttl_short_seconds: 60,
            ttl_medium_seconds: 300,
            ttl_long_seconds: 3600,
        }
    }
}

/// Tiered TTL classes for remote entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Volatile data, seconds-scale.
    Short,
    /// Query results, minutes-scale.
    Medium,
    /// Slow-moving data, hours-scale.
    Long,
}

/// Event delivered through the pub/sub channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Identity of the publishing instance.
    pub source: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

/// Subscription handler invoked per delivered event.
pub type EventHandler = Arc<dyn Fn(&RemoteEvent) -> Result<(), CacheError> + Send + Sync>;

/// Network transport for the remote tier.
///
/// Implementations speak a conventional key-value protocol
/// (connect / get / set-with-expiry / delete / publish / subscribe).
#[async_trait]
pub trait RemoteCacheTransport: Send + Sync {
    /// Open the connection. Idempotent.
    async fn connect(&self) -> Result<(), CacheError>;
    /// Close the connection. Idempotent.
    async fn disconnect(&self) -> Result<(), CacheError>;
    /// Liveness probe.
    async fn ping(&self) -> Result<(), CacheError>;
    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    /// Store a value with an expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;
    /// Delete a key.
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    /// Publish a raw payload, returning the subscriber count.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, CacheError>;
    /// Subscribe to a channel, returning a stream of raw payloads.
    async fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<String>, CacheError>;
    /// Drop the channel subscription.
    async fn unsubscribe(&self, channel: &str) -> Result<(), CacheError>;
}

struct RemoteCacheInner {
    transport: Arc<dyn RemoteCacheTransport>,
    config: RemoteCacheConfig,
    connected: AtomicBool,
    handlers: Mutex<HashMap<String, Vec<(Uuid, EventHandler)>>>,
    pumps: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Remote cache adapter over an injected transport.
#[derive(Clone)]
pub struct RemoteCache {
    inner: Arc<RemoteCacheInner>,
}

impl RemoteCache {
    /// Create an adapter over the given transport.
    pub fn new(transport: Arc<dyn RemoteCacheTransport>, config: RemoteCacheConfig) -> Self {
        Self {
            inner: Arc::new(RemoteCacheInner {
                transport,
                config,
                connected: AtomicBool::new(false),
                handlers: Mutex::new(HashMap::new()),
                pumps: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Identity attached to events published by this instance.
    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    /// Open the transport connection. Idempotent.
    pub async fn connect(&self) -> Result<(), CacheError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.transport.connect().await?;
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("remote cache connected (url={})", self.inner.config.url);
        Ok(())
    }

    /// Close the connection and stop all subscription pumps. Idempotent.
    pub async fn disconnect(&self) -> Result<(), CacheError> {
        for (_, pump) in self.inner.pumps.lock().drain() {
            pump.abort();
        }
        self.inner.handlers.lock().clear();
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            self.inner.transport.disconnect().await?;
            info!("remote cache disconnected (url={})", self.inner.config.url);
        }
        Ok(())
    }

    /// Probe the remote tier; false on any failure.
    pub async fn health_check(&self) -> bool {
        self.inner.transport.ping().await.is_ok()
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.inner.config.key_prefix, key)
    }

    fn ttl_for(&self, class: TtlClass) -> u64 {
        match class {
            TtlClass::Short => self.inner.config.ttl_short_seconds,
            TtlClass::Medium => self.inner.config.ttl_medium_seconds,
            TtlClass::Long => self.inner.config.ttl_long_seconds,
        }
    }

    /// Fetch a value under the configured namespace.
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.transport.get(&self.namespaced(key)).await
    }

    /// Store a value under the configured namespace with a tiered TTL.
    pub async fn set(&self, key: &str, value: &str, class: TtlClass) -> Result<(), CacheError> {
        self.inner
            .transport
            .set_ex(&self.namespaced(key), value, self.ttl_for(class))
            .await
    }

    /// Delete a namespaced key.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.transport.del(&self.namespaced(key)).await
    }

    /// Fetch with silent degradation: any failure is logged and reported as
    /// a miss so the caller falls back to the local tier or the store.
    pub async fn get_best_effort(&self, key: &str) -> Option<String> {
        match self.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("remote cache get failed (key={key}, error={err})");
                None
            }
        }
    }

    /// Store with silent degradation.
    pub async fn set_best_effort(&self, key: &str, value: &str, class: TtlClass) {
        if let Err(err) = self.set(key, value, class).await {
            warn!("remote cache set failed (key={key}, error={err})");
        }
    }

    /// Delete with silent degradation.
    pub async fn delete_best_effort(&self, key: &str) {
        if let Err(err) = self.delete(key).await {
            warn!("remote cache delete failed (key={key}, error={err})");
        }
    }

    /// Publish an event, returning the number of subscribers that saw it.
    pub async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<usize, CacheError> {
        let event = RemoteEvent {
            source: self.inner.config.instance_id.clone(),
            payload,
        };
        let raw = serde_json::to_string(&event)?;
        self.inner.transport.publish(channel, &raw).await
    }

    /// Register a handler for a channel, starting the delivery pump on the
    /// first subscription. Returns the handler id for unsubscription.
    pub async fn subscribe(&self, channel: &str, handler: EventHandler) -> Result<Uuid, CacheError> {
        // The transport subscription must be live before the handler is
        // registered; a failed transport call would otherwise leave a
        // handler behind that convinces later retries the pump exists.
        if !self.inner.pumps.lock().contains_key(channel) {
            let mut rx = self.inner.transport.subscribe(channel).await?;
            let inner = Arc::clone(&self.inner);
            let channel_name = channel.to_string();
            let pump = tokio::spawn(async move {
                while let Some(raw) = rx.recv().await {
                    dispatch(&inner, &channel_name, &raw);
                }
            });
            self.inner.pumps.lock().insert(channel.to_string(), pump);
            debug!("subscription pump started (channel={channel})");
        }
        let id = Uuid::new_v4();
        self.inner
            .handlers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    /// Remove one handler, or all handlers for the channel when no id is
    /// given. The pump stops once the channel has no handlers left.
    pub async fn unsubscribe(
        &self,
        channel: &str,
        handler_id: Option<Uuid>,
    ) -> Result<(), CacheError> {
        let empty = {
            let mut handlers = self.inner.handlers.lock();
            match handlers.get_mut(channel) {
                Some(list) => {
                    match handler_id {
                        Some(id) => list.retain(|(existing, _)| *existing != id),
                        None => list.clear(),
                    }
                    list.is_empty()
                }
                None => return Ok(()),
            }
        };
        if empty {
            self.inner.handlers.lock().remove(channel);
            if let Some(pump) = self.inner.pumps.lock().remove(channel) {
                pump.abort();
            }
            self.inner.transport.unsubscribe(channel).await?;
            debug!("subscription pump stopped (channel={channel})");
        }
        Ok(())
    }
}

/// Deliver one raw payload to every handler registered for a channel.
///
/// Self-published events are dropped, and a failing handler is logged
/// without blocking the others.
fn dispatch(inner: &RemoteCacheInner, channel: &str, raw: &str) {
    let event: RemoteEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            warn!("dropping malformed event (channel={channel}, error={err})");
            return;
        }
    };
    if event.source == inner.config.instance_id {
        return;
    }
    let handlers: Vec<(Uuid, EventHandler)> = inner
        .handlers
        .lock()
        .get(channel)
        .cloned()
        .unwrap_or_default();
    for (id, handler) in handlers {
        if let Err(err) = handler(&event) {
            warn!("subscription handler failed (channel={channel}, handler={id}, error={err})");
        }
    }
}
