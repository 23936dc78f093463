//! Cache configuration.
//!
//! Loaded from the `[cache]` table of `repocache.toml` (see `crate::config`).

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECONDS: u64 = 3600;
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every read goes straight to the store.
    pub enabled: bool,
    /// TTL applied when a repository does not set its own.
    pub default_ttl_seconds: u64,
    /// Maximum number of entries held by the in-memory backend.
    pub capacity: usize,
    /// Whether the in-memory backend advertises tag-scoped eviction.
    pub supports_tags: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            capacity: DEFAULT_CAPACITY,
            supports_tags: true,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
