//! Batch mutation coordination with graceful fallback.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use log::warn;
use mnemo_cache::{OperationKind, OperationMetrics};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::model::{MemoryRecord, MemoryUpdate};
use crate::retrieval::{MemoryCache, elapsed_ms};
use crate::store::MemoryStore;

/// Result of a batch update or delete.
///
/// `success` means every item went through; partial outcomes keep the
/// per-item errors alongside the count that did succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMutationOutcome {
    /// All items succeeded.
    pub success: bool,
    /// Number of items that succeeded.
    pub count: usize,
    /// One message per failed item.
    pub errors: Vec<String>,
}

/// Coordinates multi-record mutations against the store.
///
/// Creates walk a fallback chain: store-level batch when the store declares
/// it, then concurrent per-record creates, then sequential creates that
/// salvage whatever succeeds. Successful mutations invalidate the affected
/// cache entries.
pub struct BatchCoordinator {
    store: Arc<dyn MemoryStore>,
    cache: Arc<MemoryCache>,
    metrics: Arc<OperationMetrics>,
}

impl BatchCoordinator {
    /// Wire a coordinator over the given collaborators.
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

    /// Create the records in the given table, returning assigned identifiers
    /// in input order.
    ///
    /// An empty batch is a no-op. A single record goes straight to the store
    /// without batch machinery. Larger batches run the fallback chain.
    pub async fn create_batch(
        &self,
        records: &[MemoryRecord],
        table: &str,
        unique: bool,
    ) -> Result<Vec<Uuid>, MemoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let ids = if records.len() == 1 {
            vec![self.store.create_memory(&records[0], table, unique).await?]
        } else {
            self.create_many(records, table, unique).await?
        };
        self.cache.invalidate(Some(table));
        self.metrics
            .record(OperationKind::Create, elapsed_ms(started));
        Ok(ids)
    }

    async fn create_many(
        &self,
        records: &[MemoryRecord],
        table: &str,
        unique: bool,
    ) -> Result<Vec<Uuid>, MemoryError> {
        if self.store.capabilities().batch_create {
            match self.store.create_memories_batch(records, table, unique).await {
                Ok(ids) => return Ok(ids),
                Err(err) => {
                    warn!(
                        "store batch create failed, retrying per record (table={table}, error={err})"
                    );
                }
            }
        }
        match self.create_parallel(records, table, unique).await {
            Ok(ids) => Ok(ids),
            Err(err) => {
                warn!("parallel create failed, retrying sequentially (table={table}, error={err})");
                Ok(self.create_sequential(records, table, unique).await)
            }
        }
    }

    /// Concurrent per-record creates; fails if any record fails.
    async fn create_parallel(
        &self,
        records: &[MemoryRecord],
        table: &str,
        unique: bool,
    ) -> Result<Vec<Uuid>, MemoryError> {
        let results = join_all(
            records
                .iter()
                .map(|record| self.store.create_memory(record, table, unique)),
        )
        .await;
        results.into_iter().collect()
    }

    /// One-at-a-time creates that keep whatever succeeds.
    async fn create_sequential(
        &self,
        records: &[MemoryRecord],
        table: &str,
        unique: bool,
    ) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            match self.store.create_memory(record, table, unique).await {
                Ok(id) => ids.push(id),
                Err(err) => {
                    warn!("skipping record in sequential create (table={table}, error={err})");
                }
            }
        }
        ids
    }

    /// Apply the updates concurrently and report the aggregate outcome.
    ///
    /// An update the store reports as changing nothing counts as a failure.
    pub async fn update_batch(&self, updates: &[MemoryUpdate]) -> BatchMutationOutcome {
        let started = Instant::now();
        let results = join_all(updates.iter().map(|update| self.store.update_memory(update))).await;
        let mut count = 0;
        let mut errors = Vec::new();
        for (update, result) in updates.iter().zip(results) {
            match result {
                Ok(true) => count += 1,
                Ok(false) => errors.push(format!("update {} reported no change", update.id)),
                Err(err) => errors.push(format!("update {} failed: {err}", update.id)),
            }
        }
        if count > 0 {
            self.cache.invalidate(None);
        }
        self.metrics
            .record(OperationKind::Update, elapsed_ms(started));
        BatchMutationOutcome {
            success: count == updates.len(),
            count,
            errors,
        }
    }

    /// Delete the records concurrently and report the aggregate outcome.
    pub async fn delete_batch(&self, ids: &[Uuid]) -> BatchMutationOutcome {
        let started = Instant::now();
        let results = join_all(ids.iter().map(|id| self.store.delete_memory(*id))).await;
        let mut count = 0;
        let mut errors = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => count += 1,
                Err(err) => errors.push(format!("delete {id} failed: {err}")),
            }
        }
        if count > 0 {
            self.cache.invalidate(None);
        }
        self.metrics
            .record(OperationKind::Delete, elapsed_ms(started));
        BatchMutationOutcome {
            success: count == ids.len(),
            count,
            errors,
        }
    }
}
