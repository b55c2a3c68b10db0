//! Collaborator seams: the persistent store and the embedding model.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::model::{MemoryQuery, MemoryRecord, MemoryUpdate};

/// Operations a store implementation declares support for.
///
/// The mutation coordinator branches on this declared set instead of probing
/// the store at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Store-level batch create is available.
    pub batch_create: bool,
    /// Semantic search is available.
    pub search: bool,
}

/// Persistent memory store consumed by this layer.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Declared operation support.
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    /// Retrieve records matching the query, most recent first.
    async fn get_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// Retrieve records by embedding similarity.
    async fn search_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// Persist one record, returning its assigned identifier.
    async fn create_memory(
        &self,
        record: &MemoryRecord,
        table: &str,
        unique: bool,
    ) -> Result<Uuid, MemoryError>;

    /// Persist many records in one store-level call.
    ///
    /// Only invoked when [`StoreCapabilities::batch_create`] is declared.
    async fn create_memories_batch(
        &self,
        records: &[MemoryRecord],
        table: &str,
        unique: bool,
    ) -> Result<Vec<Uuid>, MemoryError> {
        let _ = (records, table, unique);
        Err(MemoryError::Store(
            "batch create not supported".to_string(),
        ))
    }

    /// Apply a partial update; false when no record was changed.
    async fn update_memory(&self, update: &MemoryUpdate) -> Result<bool, MemoryError>;

    /// Delete one record.
    async fn delete_memory(&self, id: Uuid) -> Result<(), MemoryError>;
}

/// Text embedding model consumed by this layer.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed the text into a fixed-length vector.
    ///
    /// Implementations must fail loudly on invalid input or a malformed
    /// output vector rather than return a silently broken result.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}
