//! Cache tiers, key encoding, and operation metrics for the memory layer.

pub mod error;
pub mod key;
pub mod local;
pub mod metrics;
pub mod remote;
pub mod tcp;

/// Cache error type.
pub use error::CacheError;
/// Deterministic cache key builder.
pub use key::{CacheKeyParams, FilterValue};
/// Local bounded cache tier.
pub use local::{CacheConfig, CacheStats, LocalCache};
/// Operation latency collection.
pub use metrics::{MetricsSnapshot, OperationKind, OperationMetrics, ThroughputStats};
/// Remote best-effort cache tier and pub/sub.
pub use remote::{
    EventHandler, RemoteCache, RemoteCacheConfig, RemoteCacheTransport, RemoteEvent, TtlClass,
};
/// Wire transport for the remote tier.
pub use tcp::TcpTransport;
