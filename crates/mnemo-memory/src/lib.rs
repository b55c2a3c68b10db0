//! Retrieval and mutation optimization layer between a conversational agent
//! and its persistent memory store.
//!
//! The store and embedding model are injected behind traits; this layer adds
//! caching, batch mutation fallback, lazy embedding, context aggregation,
//! and operation metrics on top of them.

pub mod batch;
pub mod context;
pub mod embedding;
pub mod error;
pub mod manager;
pub mod model;
pub mod retrieval;
pub mod store;

#[cfg(test)]
mod testing;

/// Batch mutation coordination.
pub use batch::{BatchCoordinator, BatchMutationOutcome};
/// Context aggregation.
pub use context::{ContextAggregator, ContextMetadata, ContextOptions, MemoryContext};
/// Lazy embedding policy and backfill.
pub use embedding::{EmbeddingPolicy, EmbeddingPolicyConfig, LazyEmbedder};
/// Memory error type.
pub use error::MemoryError;
/// Facade over the whole layer.
pub use manager::{MemoryManager, MemoryManagerConfig};
/// Record model and query parameters.
pub use model::{
    MemoryContent, MemoryKind, MemoryMetadata, MemoryQuery, MemoryRecord, MemoryUpdate,
};
/// Cached retrieval over the cache tiers.
pub use retrieval::{CachedRetriever, MemoryCache};
/// Collaborator seams.
pub use store::{EmbeddingModel, MemoryStore, StoreCapabilities};
