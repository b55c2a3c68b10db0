//! Cached retrieval over the local and optional remote tiers.

use std::sync::Arc;
use std::time::Instant;

use log::warn;
use mnemo_cache::{CacheConfig, CacheStats, LocalCache, OperationKind, OperationMetrics, RemoteCache, TtlClass};

use crate::error::MemoryError;
use crate::model::{MemoryQuery, MemoryRecord};
use crate::store::MemoryStore;

/// Milliseconds elapsed since the given instant.
pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Two-tier cache for query results.
///
/// The local tier is authoritative for freshness bookkeeping; the remote
/// tier is advisory and consulted only on a local miss. A remote hit warms
/// the local tier. All remote failures degrade silently.
pub struct MemoryCache {
    local: LocalCache<Vec<MemoryRecord>>,
    remote: Option<RemoteCache>,
}

impl MemoryCache {
    /// Local-only cache with the given bounds.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            local: LocalCache::new(config),
            remote: None,
        }
    }

    /// Attach a remote tier.
    pub fn with_remote(mut self, remote: RemoteCache) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Probe both tiers for a fresh value.
    pub async fn get(&self, key: &str) -> Option<Vec<MemoryRecord>> {
        if let Some(records) = self.local.get(key) {
            return Some(records);
        }
        let remote = self.remote.as_ref()?;
        let raw = remote.get_best_effort(key).await?;
        match serde_json::from_str::<Vec<MemoryRecord>>(&raw) {
            Ok(records) => {
                self.local.set(key, records.clone());
                Some(records)
            }
            Err(err) => {
                warn!("dropping undecodable remote entry (key={key}, error={err})");
                None
            }
        }
    }

    /// Store a value in both tiers. Last writer wins.
    pub async fn set(&self, key: &str, records: Vec<MemoryRecord>) {
        if let Some(remote) = &self.remote {
            match serde_json::to_string(&records) {
                Ok(raw) => remote.set_best_effort(key, &raw, TtlClass::Medium).await,
                Err(err) => warn!("skipping remote cache write (key={key}, error={err})"),
            }
        }
        self.local.set(key, records);
    }

    /// Remove local entries whose key contains the pattern, or everything
    /// when no pattern is given. The remote tier expires via TTL.
    pub fn invalidate(&self, pattern: Option<&str>) {
        self.local.invalidate(pattern);
    }

    /// Local tier statistics.
    pub fn stats(&self) -> CacheStats {
        self.local.stats()
    }

    /// Clear the local tier and its counters.
    pub fn reset(&self) {
        self.local.reset();
    }

    /// Disconnect the remote tier, if any.
    pub async fn dispose(&self) {
        if let Some(remote) = &self.remote
            && let Err(err) = remote.disconnect().await
        {
            warn!("remote cache disconnect failed (error={err})");
        }
    }
}

/// Store retrieval with cache probing and latency recording.
pub struct CachedRetriever {
    store: Arc<dyn MemoryStore>,
    cache: Arc<MemoryCache>,
    metrics: Arc<OperationMetrics>,
}

impl CachedRetriever {
    /// Wire a retriever over the given collaborators.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        cache: Arc<MemoryCache>,
        metrics: Arc<OperationMetrics>,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
        }
    }

    /// Cached plain retrieval; identical queries within TTL reach the store
    /// exactly once.
    pub async fn get_cached_memories(
        &self,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.get_cached_with_flag(query).await.map(|(records, _)| records)
    }

    /// Cached retrieval reporting whether the result came from a cache tier.
    pub async fn get_cached_with_flag(
        &self,
        query: &MemoryQuery,
    ) -> Result<(Vec<MemoryRecord>, bool), MemoryError> {
        let started = Instant::now();
        let key = query.cache_key();
        if let Some(records) = self.cache.get(&key).await {
            self.metrics
                .record(OperationKind::Retrieve, elapsed_ms(started));
            return Ok((records, true));
        }
        let records = self.store.get_memories(query).await?;
        self.cache.set(&key, records.clone()).await;
        self.metrics
            .record(OperationKind::Retrieve, elapsed_ms(started));
        Ok((records, false))
    }

    /// Cached semantic search.
    pub async fn search_cached_memories(
        &self,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.search_cached_with_flag(query)
            .await
            .map(|(records, _)| records)
    }

    /// Cached semantic search reporting the cache-hit flag.
    pub async fn search_cached_with_flag(
        &self,
        query: &MemoryQuery,
    ) -> Result<(Vec<MemoryRecord>, bool), MemoryError> {
        let started = Instant::now();
        let key = query.cache_key();
        if let Some(records) = self.cache.get(&key).await {
            self.metrics
                .record(OperationKind::Search, elapsed_ms(started));
            return Ok((records, true));
        }
        let records = self.store.search_memories(query).await?;
        self.cache.set(&key, records.clone()).await;
        self.metrics
            .record(OperationKind::Search, elapsed_ms(started));
        Ok((records, false))
    }
}
