//! Cache tagging
//!
//! Groups named caches under tags so that one write can reset every cache
//! derived from the data it touched.

use crate::{CacheKey, CacheTag};
use dashmap::DashMap;
use std::collections::HashSet;

/// In-memory registry mapping tags to cache names
#[derive(Debug, Default)]
pub struct MemoryTagRegistry {
    /// Maps tag -> set of cache names
    tag_to_caches: DashMap<CacheTag, HashSet<CacheKey>>,
}

impl MemoryTagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tags to a cache name
    pub fn tag_cache(&self, cache: &str, tags: &[&str]) {
        for tag in tags {
            self.tag_to_caches
                .entry(tag.to_string())
                .or_default()
                .insert(cache.to_string());
        }
    }

    /// Remove a cache name from every tag
    pub fn untag_cache(&self, cache: &str) {
        for mut entry in self.tag_to_caches.iter_mut() {
            entry.value_mut().remove(cache);
        }
        self.tag_to_caches.retain(|_, caches| !caches.is_empty());
    }

    /// Cache names bound to a tag, sorted for deterministic resets
    pub fn caches_for_tag(&self, tag: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .tag_to_caches
            .get(tag)
            .map(|caches| caches.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
