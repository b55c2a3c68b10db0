//! Error types for memory operations.

/// Errors returned by the memory layer and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The persistent store reported a failure.
    #[error("store error: {0}")]
    Store(String),
    /// The embedding model reported a failure.
    #[error("embedding error: {0}")]
    Embedding(String),
    /// A collaborator produced or was given a malformed embedding.
    /// Contract violation, never recovered from.
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Cache tier error.
    #[error("cache error: {0}")]
    Cache(#[from] mnemo_cache::CacheError),
    /// Context aggregation failed as a whole.
    #[error("context aggregation failed at {stage}: {message}")]
    Context {
        /// Stage that failed.
        stage: String,
        /// Failure description.
        message: String,
    },
}
