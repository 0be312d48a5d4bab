//! # oerp-cache
//!
//! Process-wide memoization for the oerp framework.
//!
//! Entries are keyed by `(database, cache name, key)`. There is no TTL: a
//! cache stays valid until a mutating call resets it, either by name or
//! through a tag (usually a model name) the cache was bound to.
//!
//! ## Quick Start
//!
//! ```rust
//! use oerp_cache::{Cache, CacheConfig};
//!
//! let cache = Cache::new(CacheConfig::default());
//! cache.bind("res.lang", "res.lang.get_default");
//!
//! cache.put("demo", "res.lang.get_default", "code", &"en_US".to_string());
//! let lang: Option<String> = cache.get("demo", "res.lang.get_default", "code");
//! assert_eq!(lang.as_deref(), Some("en_US"));
//!
//! // a write on res.lang drops every cache bound to it
//! cache.invalidate_tag("demo", "res.lang");
//! assert_eq!(cache.get::<String>("demo", "res.lang.get_default", "code"), None);
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod backends;
pub mod config;
pub mod tagging;

pub use backends::*;
pub use config::*;
pub use tagging::*;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache configuration error: {0}")]
    Configuration(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache key type
pub type CacheKey = String;

/// Cache tags for grouping caches that a write must reset together
pub type CacheTag = String;

/// Storage contract for memo caches.
///
/// Lookups never fail: a backend that cannot answer reports a miss.
pub trait CacheBackend: Send + Sync {
    /// Get a value from one named cache of a database
    fn get(&self, database: &str, cache: &str, key: &str) -> Option<serde_json::Value>;

    /// Store a value in one named cache of a database
    fn put(&self, database: &str, cache: &str, key: &str, value: serde_json::Value);

    /// Drop every entry of one named cache
    fn reset(&self, database: &str, cache: &str);

    /// Drop every cache of a database
    fn clear(&self, database: &str);

    /// Get cache statistics
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_keys: u64,
    pub resets: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Build a compact key from any serializable argument tuple.
///
/// Short keys are kept readable; long ones (domains, id lists) are hashed.
pub fn cache_key<K: Serialize + ?Sized>(parts: &K) -> CacheKey {
    let raw = serde_json::to_string(parts).unwrap_or_default();
    if raw.len() <= 64 {
        raw
    } else {
        hex::encode(blake3::hash(raw.as_bytes()).as_bytes())
    }
}

/// High-level cache handle shared by every transaction of a registry
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    tags: Arc<MemoryTagRegistry>,
}

impl Cache {
    /// Create a cache backed by the in-memory backend
    pub fn new(config: CacheConfig) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new(config)))
    }

    /// Create a cache over a custom backend
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            tags: Arc::new(MemoryTagRegistry::new()),
        }
    }

    /// Get a typed value. A value that no longer deserializes counts as a miss.
    pub fn get<T>(&self, database: &str, cache: &str, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let value = self.backend.get(database, cache, key)?;
        serde_json::from_value(value).ok()
    }

    /// Store a typed value. Values that cannot be serialized are not cached.
    pub fn put<T>(&self, database: &str, cache: &str, key: &str, value: &T)
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_value(value) {
            Ok(json) => self.backend.put(database, cache, key, json),
            Err(e) => tracing::debug!("not caching {}[{}]: {}", cache, key, e),
        }
    }

    /// Return the cached value or compute, store and return it
    pub async fn remember<T, E, F, Fut>(
        &self,
        database: &str,
        cache: &str,
        key: &str,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(database, cache, key) {
            return Ok(hit);
        }
        let value = compute().await?;
        self.put(database, cache, key, &value);
        Ok(value)
    }

    /// Drop one named cache
    pub fn reset(&self, database: &str, cache: &str) {
        tracing::debug!("cache reset {}:{}", database, cache);
        self.backend.reset(database, cache);
    }

    /// Drop every cache of a database
    pub fn clear(&self, database: &str) {
        self.backend.clear(database);
    }

    /// Register `cache` to be reset whenever `tag` is invalidated
    pub fn bind(&self, tag: &str, cache: &str) {
        self.tags.tag_cache(cache, &[tag]);
    }

    /// Reset every cache bound to `tag`, returning their names
    pub fn invalidate_tag(&self, database: &str, tag: &str) -> Vec<String> {
        let names = self.tags.caches_for_tag(tag);
        for name in &names {
            self.reset(database, name);
        }
        names
    }

    /// Backend statistics
    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = Cache::default();
        cache.put("db", "digits", "account.line", &(16, 2));
        let digits: Option<(u32, u32)> = cache.get("db", "digits", "account.line");
        assert_eq!(digits, Some((16, 2)));
    }

    #[test]
    fn test_miss_is_none() {
        let cache = Cache::default();
        assert_eq!(cache.get::<String>("db", "missing", "key"), None);
    }

    #[test]
    fn test_databases_are_isolated() {
        let cache = Cache::default();
        cache.put("one", "lang", "default", &"fr_FR");
        assert_eq!(cache.get::<String>("two", "lang", "default"), None);
        cache.clear("one");
        assert_eq!(cache.get::<String>("one", "lang", "default"), None);
    }

    #[test]
    fn test_tag_invalidation_resets_bound_caches_only() {
        let cache = Cache::default();
        cache.bind("ir.rule", "ir.rule.domain_get");
        cache.put("db", "ir.rule.domain_get", "k", &1);
        cache.put("db", "ir.model.access.check", "k", &true);

        let reset = cache.invalidate_tag("db", "ir.rule");
        assert_eq!(reset, vec!["ir.rule.domain_get".to_string()]);
        assert_eq!(cache.get::<i32>("db", "ir.rule.domain_get", "k"), None);
        assert_eq!(cache.get::<bool>("db", "ir.model.access.check", "k"), Some(true));
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let ids: Vec<i64> = (0..100).collect();
        let key = cache_key(&ids);
        assert_eq!(key.len(), 64);
        assert_eq!(key, cache_key(&ids));
        assert_eq!(cache_key(&("a", 1)), "[\"a\",1]");
    }

    #[tokio::test]
    async fn test_remember_computes_once() {
        let cache = Cache::default();
        let mut calls = 0;
        let first: Result<i32, ()> = cache
            .remember("db", "c", "k", || {
                calls += 1;
                async { Ok(42) }
            })
            .await;
        assert_eq!(first, Ok(42));
        let second: Result<i32, ()> = cache.remember("db", "c", "k", || async { Ok(7) }).await;
        assert_eq!(second, Ok(42));
        assert_eq!(calls, 1);
    }
}
