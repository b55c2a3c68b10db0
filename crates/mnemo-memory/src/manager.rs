//! Facade wiring the retrieval, mutation, and aggregation pieces together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use mnemo_cache::{
    CacheConfig, CacheStats, MetricsSnapshot, OperationKind, OperationMetrics, RemoteCache,
};
use uuid::Uuid;

use crate::batch::{BatchCoordinator, BatchMutationOutcome};
use crate::context::{ContextAggregator, ContextOptions, MemoryContext};
use crate::embedding::{EmbeddingPolicy, EmbeddingPolicyConfig, LazyEmbedder};
use crate::error::MemoryError;
use crate::model::{MemoryQuery, MemoryRecord, MemoryUpdate};
use crate::retrieval::{CachedRetriever, MemoryCache, elapsed_ms};
use crate::store::{EmbeddingModel, MemoryStore};

/// Settings for the whole layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemoryManagerConfig {
    /// Local cache bounds.
    pub cache: CacheConfig,
    /// Embedding policy thresholds.
    pub policy: EmbeddingPolicyConfig,
}

/// Entry point to the memory optimization layer.
///
/// Owns the cache and metrics and delegates to the retrieval, batch,
/// embedding, and context components, keeping their bookkeeping consistent.
pub struct MemoryManager {
    cache: Arc<MemoryCache>,
    metrics: Arc<OperationMetrics>,
    retriever: Arc<CachedRetriever>,
    batch: BatchCoordinator,
    lazy: Arc<LazyEmbedder>,
    aggregator: ContextAggregator,
}

impl MemoryManager {
    /// Build a manager over the store and embedding model, local cache only.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        model: Arc<dyn EmbeddingModel>,
        config: MemoryManagerConfig,
    ) -> Self {
        Self::build(store, model, config, MemoryCache::new(config.cache))
    }

    /// Build a manager with a remote cache tier attached.
    pub fn with_remote(
        store: Arc<dyn MemoryStore>,
        model: Arc<dyn EmbeddingModel>,
        config: MemoryManagerConfig,
        remote: RemoteCache,
    ) -> Self {
        Self::build(
            store,
            model,
            config,
            MemoryCache::new(config.cache).with_remote(remote),
        )
    }

    fn build(
        store: Arc<dyn MemoryStore>,
        model: Arc<dyn EmbeddingModel>,
        config: MemoryManagerConfig,
        cache: MemoryCache,
    ) -> Self {
        let cache = Arc::new(cache);
        let metrics = Arc::new(OperationMetrics::new());
        let retriever = Arc::new(CachedRetriever::new(
            store.clone(),
            cache.clone(),
            metrics.clone(),
        ));
        let batch = BatchCoordinator::new(store.clone(), cache.clone(), metrics.clone());
        let lazy = Arc::new(LazyEmbedder::new(
            store,
            model.clone(),
            EmbeddingPolicy::new(config.policy),
        ));
        let aggregator = ContextAggregator::new(retriever.clone(), model, lazy.clone());
        Self {
            cache,
            metrics,
            retriever,
            batch,
            lazy,
            aggregator,
        }
    }

    /// Cached plain retrieval.
    pub async fn get_memories(
        &self,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.retriever.get_cached_memories(query).await
    }

    /// Cached semantic search.
    pub async fn search_memories(
        &self,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.retriever.search_cached_memories(query).await
    }

    /// Create one record with policy-gated embedding.
    pub async fn create_memory(
        &self,
        record: MemoryRecord,
        table: &str,
        unique: bool,
    ) -> Result<Uuid, MemoryError> {
        let started = Instant::now();
        let id = self
            .lazy
            .create_with_lazy_embedding(record, table, unique)
            .await?;
        self.cache.invalidate(Some(table));
        self.metrics
            .record(OperationKind::Create, elapsed_ms(started));
        Ok(id)
    }

    /// Create many records through the batch fallback chain.
    pub async fn create_memories(
        &self,
        records: &[MemoryRecord],
        table: &str,
        unique: bool,
    ) -> Result<Vec<Uuid>, MemoryError> {
        self.batch.create_batch(records, table, unique).await
    }

    /// Apply a batch of updates.
    pub async fn update_memories(&self, updates: &[MemoryUpdate]) -> BatchMutationOutcome {
        self.batch.update_batch(updates).await
    }

    /// Delete a batch of records.
    pub async fn delete_memories(&self, ids: &[Uuid]) -> BatchMutationOutcome {
        self.batch.delete_batch(ids).await
    }

    /// Backfill embeddings on records lacking one.
    pub async fn backfill_embeddings(&self, records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
        self.lazy.backfill_embeddings(records).await
    }

    /// Assemble room context around the query text.
    pub async fn get_context(
        &self,
        room_id: Uuid,
        query_text: &str,
        options: &ContextOptions,
    ) -> Result<MemoryContext, MemoryError> {
        self.aggregator.get_context(room_id, query_text, options).await
    }

    /// Fetch several tables with shared filters.
    pub async fn get_by_multiple_criteria(
        &self,
        tables: &[String],
        filters: &BTreeMap<String, Option<serde_json::Value>>,
        count: usize,
    ) -> HashMap<String, Vec<MemoryRecord>> {
        self.aggregator
            .get_by_multiple_criteria(tables, filters, count)
            .await
    }

    /// Drop cached entries for one table, or everything.
    pub fn clear(&self, table: Option<&str>) {
        self.cache.invalidate(table);
    }

    /// Local cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Combined cache, latency, and throughput snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.stats())
    }

    /// Zero all counters and drop every cached entry.
    pub fn reset(&self) {
        self.metrics.reset();
        self.cache.reset();
    }

    /// Release held resources; the manager must not be used afterwards.
    pub async fn dispose(&self) {
        self.cache.dispose().await;
    }
}
