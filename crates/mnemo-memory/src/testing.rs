//! In-crate test doubles for the store and embedding model seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::model::{MemoryQuery, MemoryRecord, MemoryUpdate};
use crate::store::{EmbeddingModel, MemoryStore, StoreCapabilities};

/// Per-method call counts observed by a [`CountingStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub get_memories: usize,
    pub search_memories: usize,
    pub create_memory: usize,
    pub create_memories_batch: usize,
    pub update_memory: usize,
    pub delete_memory: usize,
}

/// In-memory [`MemoryStore`] that counts calls and supports injected
/// failures.
///
/// Retrieval and search answer from canned record sets; creates persist
/// into an inspectable map.
#[derive(Default)]
pub struct CountingStore {
    capabilities: StoreCapabilities,
    counts: Mutex<StoreCallCounts>,
    recall: Mutex<Vec<MemoryRecord>>,
    search: Mutex<Vec<MemoryRecord>>,
    created: Mutex<HashMap<Uuid, MemoryRecord>>,
    fail_batch: AtomicBool,
    failing_creates: AtomicUsize,
    fail_search: AtomicBool,
    failing_tables: Mutex<HashSet<String>>,
    unchanged_ids: Mutex<HashSet<Uuid>>,
}

impl CountingStore {
    /// Store with default capabilities and empty canned results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the declared capabilities.
    pub fn with_capabilities(mut self, capabilities: StoreCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Canned records returned by `get_memories`.
    pub fn set_recall(&self, records: Vec<MemoryRecord>) {
        *self.recall.lock() = records;
    }

    /// Canned records returned by `search_memories`.
    pub fn set_search(&self, records: Vec<MemoryRecord>) {
        *self.search.lock() = records;
    }

    /// Make every `create_memories_batch` call fail.
    pub fn fail_batch_create(&self) {
        self.fail_batch.store(true, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `create_memory` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    /// Make every `search_memories` call fail.
    pub fn fail_search(&self) {
        self.fail_search.store(true, Ordering::SeqCst);
    }

    /// Make `get_memories` fail for one table.
    pub fn fail_get_for_table(&self, table: &str) {
        self.failing_tables.lock().insert(table.to_string());
    }

    /// Make `update_memory` report no change for this id.
    pub fn report_false_for(&self, id: Uuid) {
        self.unchanged_ids.lock().insert(id);
    }

    /// Call counts so far.
    pub fn counts(&self) -> StoreCallCounts {
        *self.counts.lock()
    }

    /// The record persisted under this id, if any.
    pub fn created(&self, id: Uuid) -> Option<MemoryRecord> {
        self.created.lock().get(&id).cloned()
    }

    fn persist(&self, record: &MemoryRecord) -> Uuid {
        let id = Uuid::new_v4();
        let mut stored = record.clone();
        stored.id = Some(id);
        self.created.lock().insert(id, stored);
        id
    }
}

#[async_trait]
impl MemoryStore for CountingStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn get_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.counts.lock().get_memories += 1;
        if self.failing_tables.lock().contains(&query.table_name) {
            return Err(MemoryError::Store(format!(
                "injected failure for table {}",
                query.table_name
            )));
        }
        Ok(self.recall.lock().clone())
    }

    async fn search_memories(&self, _query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.counts.lock().search_memories += 1;
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(MemoryError::Store("injected search failure".to_string()));
        }
        Ok(self.search.lock().clone())
    }

    async fn create_memory(
        &self,
        record: &MemoryRecord,
        _table: &str,
        _unique: bool,
    ) -> Result<Uuid, MemoryError> {
        self.counts.lock().create_memory += 1;
        let injected = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MemoryError::Store("injected create failure".to_string()));
        }
        Ok(self.persist(record))
    }

    async fn create_memories_batch(
        &self,
        records: &[MemoryRecord],
        _table: &str,
        _unique: bool,
    ) -> Result<Vec<Uuid>, MemoryError> {
        self.counts.lock().create_memories_batch += 1;
        if self.fail_batch.load(Ordering::SeqCst) {
            return Err(MemoryError::Store("injected batch failure".to_string()));
        }
        Ok(records.iter().map(|record| self.persist(record)).collect())
    }

    async fn update_memory(&self, update: &MemoryUpdate) -> Result<bool, MemoryError> {
        self.counts.lock().update_memory += 1;
        if self.unchanged_ids.lock().contains(&update.id) {
            return Ok(false);
        }
        if let Some(embedding) = &update.embedding
            && let Some(stored) = self.created.lock().get_mut(&update.id)
        {
            stored.embedding = Some(embedding.clone());
        }
        Ok(true)
    }

    async fn delete_memory(&self, id: Uuid) -> Result<(), MemoryError> {
        self.counts.lock().delete_memory += 1;
        self.created.lock().remove(&id);
        Ok(())
    }
}

/// Embedding model returning one fixed vector and recording its inputs.
pub struct StubEmbedder {
    vector: Vec<f32>,
    calls: Mutex<Vec<String>>,
}

impl StubEmbedder {
    /// Embedder answering every call with the given vector.
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Texts passed to `embed` so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EmbeddingModel for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidEmbedding(
                "cannot embed empty text".to_string(),
            ));
        }
        self.calls.lock().push(text.to_string());
        Ok(self.vector.clone())
    }
}

/// Embedding model whose every call fails.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingModel for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, MemoryError> {
        Err(MemoryError::Embedding("model unavailable".to_string()))
    }
}
