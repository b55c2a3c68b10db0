//! In-memory remote cache transports.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use mnemo_cache::error::CacheError;
use mnemo_cache::remote::RemoteCacheTransport;

/// In-memory transport acting as a shared bus between adapter instances.
///
/// TTLs are recorded but never enforced; tests inspect them directly.
#[derive(Default)]
pub struct MemoryTransport {
    values: Mutex<HashMap<String, String>>,
    ttls: Mutex<HashMap<String, u64>>,
    channels: Mutex<HashMap<String, Vec<UnboundedSender<String>>>>,
}

impl MemoryTransport {
    /// The raw value stored under a key, namespace prefix included.
    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    /// The TTL recorded for a key, namespace prefix included.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.ttls.lock().get(key).copied()
    }
}

#[async_trait]
impl RemoteCacheTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        self.ttls.lock().insert(key.to_string(), ttl_seconds);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.values.lock().remove(key);
        self.ttls.lock().remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, CacheError> {
        let senders = self.channels.lock().get(channel).cloned().unwrap_or_default();
        let mut delivered = 0;
        for sender in senders {
            if sender.send(payload.to_string()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<String>, CacheError> {
        let (tx, rx) = unbounded_channel();
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), CacheError> {
        self.channels.lock().remove(channel);
        Ok(())
    }
}

/// Transport whose every operation fails as if the service were down.
pub struct FailingTransport;

#[async_trait]
impl RemoteCacheTransport for FailingTransport {
    async fn connect(&self) -> Result<(), CacheError> {
        Err(CacheError::Protocol("connection refused".to_string()))
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::NotConnected)
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::NotConnected)
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<(), CacheError> {
        Err(CacheError::NotConnected)
    }

    async fn del(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::NotConnected)
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> Result<usize, CacheError> {
        Err(CacheError::NotConnected)
    }

    async fn subscribe(&self, _channel: &str) -> Result<UnboundedReceiver<String>, CacheError> {
        Err(CacheError::NotConnected)
    }

    async fn unsubscribe(&self, _channel: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
