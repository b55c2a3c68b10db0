//! Error types for cache operations.

/// Errors returned by cache tiers and transports.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error while talking to the remote tier.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error for cached payloads or events.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Wire-protocol violation from the remote tier.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Operation issued before the transport was connected.
    #[error("remote cache not connected")]
    NotConnected,
    /// A subscription handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),
}
