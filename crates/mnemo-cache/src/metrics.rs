//! Per-operation latency windows and throughput aggregation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::local::CacheStats;

/// Rolling window cap per operation kind; oldest samples drop first.
const SAMPLE_WINDOW: usize = 1000;

/// Kind of store-facing operation being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Record creation.
    Create,
    /// Plain retrieval.
    Retrieve,
    /// Semantic search.
    Search,
    /// Record update.
    Update,
    /// Record deletion.
    Delete,
}

/// Throughput derived from recorded samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    /// Operations per second since the first recorded sample.
    pub ops_per_second: f64,
    /// Total operations recorded since creation or reset.
    pub total_ops: u64,
}

/// Aggregated view over cache and operation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Local cache statistics at snapshot time.
    pub cache: CacheStats,
    /// Mean latency in milliseconds per operation kind.
    pub operation_latency: BTreeMap<OperationKind, f64>,
    /// Derived throughput statistics.
    pub throughput: ThroughputStats,
}

struct MetricsInner {
    windows: HashMap<OperationKind, VecDeque<f64>>,
    total_ops: u64,
    started_at: Option<Instant>,
}

/// Collector for per-operation latencies.
///
/// Pure aggregation over bounded in-memory windows; no I/O. One instance per
/// memory layer, injected into callers rather than held globally.
pub struct OperationMetrics {
    inner: Mutex<MetricsInner>,
}

impl OperationMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                windows: HashMap::new(),
                total_ops: 0,
                started_at: None,
            }),
        }
    }

    /// Record one operation latency sample in milliseconds.
    pub fn record(&self, kind: OperationKind, duration_millis: f64) {
        let mut inner = self.inner.lock();
        if inner.started_at.is_none() {
            inner.started_at = Some(Instant::now());
        }
        let window = inner.windows.entry(kind).or_default();
        if window.len() >= SAMPLE_WINDOW {
            window.pop_front();
        }
        window.push_back(duration_millis);
        inner.total_ops += 1;
    }

    /// Mean latency in milliseconds for one kind, if any samples exist.
    pub fn mean_latency(&self, kind: OperationKind) -> Option<f64> {
        let inner = self.inner.lock();
        let window = inner.windows.get(&kind)?;
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    /// Aggregate all windows together with the supplied cache statistics.
    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let mut operation_latency = BTreeMap::new();
        for (kind, window) in &inner.windows {
            if window.is_empty() {
                continue;
            }
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            operation_latency.insert(*kind, mean);
        }
        let elapsed = inner
            .started_at
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let ops_per_second = if elapsed > 0.0 {
            inner.total_ops as f64 / elapsed
        } else {
            0.0
        };
        MetricsSnapshot {
            cache,
            operation_latency,
            throughput: ThroughputStats {
                ops_per_second,
                total_ops: inner.total_ops,
            },
        }
    }

    /// Clear all windows and counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.windows.clear();
        inner.total_ops = 0;
        inner.started_at = None;
    }
}

impl Default for OperationMetrics {
    /// Empty collector.
    fn default() -> Self {
        Self::new()
    }
}
