//! Cache backend collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::keys::{CacheKey, Tag};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Storage behind the cache gateway.
///
/// Values are plain JSON so a single backend can hold results for every
/// entity type. Backends that cannot evict by tag report it through
/// [`CacheBackend::supports_tags`]; the gateway then never calls the other
/// methods.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Unexpired value stored under `(tag, key)`.
    async fn get(&self, tag: &Tag, key: &CacheKey) -> Result<Option<Value>, CacheError>;

    /// Store `value` under `(tag, key)`, replacing any previous value.
    async fn put(
        &self,
        tag: &Tag,
        key: CacheKey,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove every entry stored under `tag`. Returns how many were removed.
    async fn flush_tag(&self, tag: &Tag) -> Result<u64, CacheError>;

    /// Capability probe for tag-scoped bulk eviction.
    fn supports_tags(&self) -> bool;
}
