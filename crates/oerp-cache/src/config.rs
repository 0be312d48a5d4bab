//! Cache configuration

use serde::{Deserialize, Serialize};

/// Cache configuration for the memory backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of keys held by one named cache of one database.
    /// A cache that overflows is dropped as a whole and refilled on demand.
    pub max_entries: Option<usize>,

    /// Collect hit/miss counters
    pub track_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(10_000),
            track_stats: true,
        }
    }
}

impl CacheConfig {
    pub fn max_entries_limit(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn unlimited_entries(mut self) -> Self {
        self.max_entries = None;
        self
    }

    pub fn without_stats(mut self) -> Self {
        self.track_stats = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, Some(10_000));
        assert!(config.track_stats);
    }

    #[test]
    fn test_config_chaining() {
        let config = CacheConfig::default().max_entries_limit(5).without_stats();
        assert_eq!(config.max_entries, Some(5));
        assert!(!config.track_stats);
        assert_eq!(config.unlimited_entries().max_entries, None);
    }
}
