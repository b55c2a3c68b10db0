//! Bounded in-process cache with LRU eviction and TTL expiry.

use std::time::{Duration, Instant};

use linked_hash_map::LinkedHashMap;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Configuration for the local cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_entries: usize,
    /// Time-to-live applied to every entry, in seconds.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    /// Default cache bounds.
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_seconds: 300,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Current entry count.
    pub size: usize,
    /// Configured capacity bound.
    pub max_size: usize,
    /// Configured TTL in seconds.
    pub ttl_seconds: u64,
    /// Recorded cache hits since creation or reset.
    pub hits: u64,
    /// Recorded cache misses since creation or reset.
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when no accesses were recorded.
    pub hit_rate: f64,
    /// misses / (hits + misses), 0.0 when no accesses were recorded.
    pub miss_rate: f64,
}

/// One cached value with its insertion timestamp.
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

struct CacheInner<V> {
    entries: LinkedHashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Fixed-capacity, TTL-bounded, recency-ordered cache.
///
/// `get` refreshes recency ordering but not the TTL; entries past their TTL
/// are removed on access and counted as misses. Insertion beyond capacity
/// evicts the least-recently-used entry. `set` is last-writer-wins.
pub struct LocalCache<V> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
}

impl<V: Clone> LocalCache<V> {
    /// Create a cache with the given bounds. A zero capacity is clamped to
    /// one entry so the eviction loop always terminates below the bound.
    pub fn new(config: CacheConfig) -> Self {
        let config = CacheConfig {
            max_entries: config.max_entries.max(1),
            ..config
        };
        Self {
            inner: Mutex::new(CacheInner {
                entries: LinkedHashMap::new(),
                hits: 0,
                misses: 0,
            }),
            config,
        }
    }

    /// Look up a fresh value, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<V> {
        enum Lookup<V> {
            Hit(V),
            Expired,
            Absent,
        }

        let mut inner = self.inner.lock();
        let outcome = match inner.entries.get_refresh(key) {
            Some(entry) if entry.is_expired() => Lookup::Expired,
            Some(entry) => Lookup::Hit(entry.value.clone()),
            None => Lookup::Absent,
        };
        match outcome {
            Lookup::Hit(value) => {
                inner.hits += 1;
                Some(value)
            }
            Lookup::Expired => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            Lookup::Absent => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a value, evicting the least-recently-used entries beyond
    /// capacity.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = self.inner.lock();
        // Re-setting an existing key refreshes both value and timestamp.
        inner.entries.remove(&key);
        while inner.entries.len() >= self.config.max_entries {
            if inner.entries.pop_front().is_none() {
                break;
            }
        }
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl: Duration::from_secs(self.config.ttl_seconds),
            },
        );
    }

    /// Remove entries whose key contains the given substring, or everything
    /// when no pattern is given.
    pub fn invalidate(&self, pattern: Option<&str>) {
        let mut inner = self.inner.lock();
        match pattern {
            Some(pattern) => {
                let matched: Vec<String> = inner
                    .entries
                    .keys()
                    .filter(|key| key.contains(pattern))
                    .cloned()
                    .collect();
                let removed = matched.len();
                for key in matched {
                    inner.entries.remove(&key);
                }
                debug!("cache invalidated (pattern={pattern}, removed={removed})");
            }
            None => {
                let removed = inner.entries.len();
                inner.entries.clear();
                debug!("cache cleared (removed={removed})");
            }
        }
    }

    /// Current statistics with real hit/miss rates.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let (hit_rate, miss_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                inner.hits as f64 / total as f64,
                inner.misses as f64 / total as f64,
            )
        };
        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_entries,
            ttl_seconds: self.config.ttl_seconds,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            miss_rate,
        }
    }

    /// Clear all entries and counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }
}

impl<V: Clone> Default for LocalCache<V> {
    /// Cache with default bounds.
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheConfig, LocalCache};
    use pretty_assertions::assert_eq;

    fn small_cache(max_entries: usize) -> LocalCache<Vec<u32>> {
        LocalCache::new(CacheConfig {
            max_entries,
            ttl_seconds: 300,
        })
    }

    #[test]
    fn get_returns_cached_value_and_counts_hits() {
        let cache = small_cache(10);
        cache.set("a", vec![1, 2]);
        assert_eq!(cache.get("a"), Some(vec![1, 2]));
        assert_eq!(cache.get("b"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn capacity_bound_evicts_least_recently_used() {
        let cache = small_cache(2);
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(vec![1]));
        cache.set("c", vec![3]);

        assert_eq!(cache.get("a"), Some(vec![1]));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(vec![3]));
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one_entry() {
        let cache = small_cache(0);
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);

        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.stats().max_size, 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(vec![2]));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = LocalCache::new(CacheConfig {
            max_entries: 10,
            ttl_seconds: 0,
        });
        cache.set("a", vec![1]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn invalidate_by_substring_spares_unrelated_entries() {
        let cache = small_cache(10);
        cache.set("table=messages|room=r1", vec![1]);
        cache.set("table=messages|room=r2", vec![2]);
        cache.set("table=facts|room=r1", vec![3]);

        cache.invalidate(Some("messages"));

        assert_eq!(cache.get("table=messages|room=r1"), None);
        assert_eq!(cache.get("table=messages|room=r2"), None);
        assert_eq!(cache.get("table=facts|room=r1"), Some(vec![3]));
    }

    #[test]
    fn invalidate_without_pattern_clears_everything() {
        let cache = small_cache(10);
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);
        cache.invalidate(None);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn reset_zeroes_counters_and_entries() {
        let cache = small_cache(10);
        cache.set("a", vec![1]);
        let _ = cache.get("a");
        let _ = cache.get("missing");
        cache.reset();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn set_is_last_writer_wins() {
        let cache = small_cache(10);
        cache.set("a", vec![1]);
        cache.set("a", vec![2]);
        assert_eq!(cache.get("a"), Some(vec![2]));
        assert_eq!(cache.stats().size, 1);
    }
}
