//! In-memory cache backend

use crate::{CacheBackend, CacheConfig, CacheStats};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

type BucketKey = (String, String);

/// In-memory cache backend: one bucket per `(database, cache name)`
pub struct MemoryBackend {
    buckets: DashMap<BucketKey, HashMap<String, serde_json::Value>>,
    config: CacheConfig,
    stats: Mutex<CacheStats>,
}

impl MemoryBackend {
    /// Create a new memory backend with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn bucket_key(database: &str, cache: &str) -> BucketKey {
        (database.to_string(), cache.to_string())
    }

    fn record(&self, hit: bool) {
        if !self.config.track_stats {
            return;
        }
        let mut stats = self.stats.lock();
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, database: &str, cache: &str, key: &str) -> Option<serde_json::Value> {
        let value = self
            .buckets
            .get(&Self::bucket_key(database, cache))
            .and_then(|bucket| bucket.get(key).cloned());
        self.record(value.is_some());
        value
    }

    fn put(&self, database: &str, cache: &str, key: &str, value: serde_json::Value) {
        let mut bucket = self
            .buckets
            .entry(Self::bucket_key(database, cache))
            .or_default();
        if let Some(max) = self.config.max_entries {
            if bucket.len() >= max && !bucket.contains_key(key) {
                tracing::debug!("cache {}:{} overflowed {} entries, dropping it", database, cache, max);
                bucket.clear();
            }
        }
        bucket.insert(key.to_string(), value);
    }

    fn reset(&self, database: &str, cache: &str) {
        if self.buckets.remove(&Self::bucket_key(database, cache)).is_some() {
            self.stats.lock().resets += 1;
        }
    }

    fn clear(&self, database: &str) {
        let before = self.buckets.len();
        self.buckets.retain(|(db, _), _| db != database);
        let dropped = before.saturating_sub(self.buckets.len()) as u64;
        self.stats.lock().resets += dropped;
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.total_keys = self.buckets.iter().map(|b| b.value().len() as u64).sum();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.get("db", "c", "k"), None);

        backend.put("db", "c", "k", json!("v"));
        assert_eq!(backend.get("db", "c", "k"), Some(json!("v")));

        backend.reset("db", "c");
        assert_eq!(backend.get("db", "c", "k"), None);
    }

    #[test]
    fn test_overflow_drops_bucket() {
        let backend = MemoryBackend::new(CacheConfig::default().max_entries_limit(2));
        backend.put("db", "c", "a", json!(1));
        backend.put("db", "c", "b", json!(2));
        backend.put("db", "c", "a", json!(3));
        assert_eq!(backend.get("db", "c", "b"), Some(json!(2)));

        backend.put("db", "c", "c", json!(4));
        assert_eq!(backend.get("db", "c", "a"), None);
        assert_eq!(backend.get("db", "c", "c"), Some(json!(4)));
    }

    #[test]
    fn test_clear_only_touches_one_database() {
        let backend = MemoryBackend::default();
        backend.put("one", "c", "k", json!(1));
        backend.put("two", "c", "k", json!(2));
        backend.clear("one");
        assert_eq!(backend.get("one", "c", "k"), None);
        assert_eq!(backend.get("two", "c", "k"), Some(json!(2)));
    }

    #[test]
    fn test_stats_tracking() {
        let backend = MemoryBackend::default();
        backend.put("db", "c", "k", json!(1));
        backend.get("db", "c", "k");
        backend.get("db", "c", "missing");

        let stats = backend.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }
}
