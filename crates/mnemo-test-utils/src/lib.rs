//! Shared remote-cache transport doubles for the memory layer crates.

pub mod transport;

/// In-memory remote transports.
pub use transport::{FailingTransport, MemoryTransport};
