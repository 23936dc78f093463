//! In-memory cache backend.
//!
//! Entries live in a single LRU keyed by `(tag, key)`; a secondary index maps
//! each tag to the keys written under it so a tag can be flushed without
//! scanning the whole cache.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;

use super::backend::{CacheBackend, CacheError};
use super::config::CacheConfig;
use super::keys::{CacheKey, Tag};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::memory";
const METRIC_CACHE_EVICT_TOTAL: &str = "repocache_cache_evict_total";

type EntryKey = (Tag, CacheKey);

#[derive(Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// LRU entries and the tag index change together under one lock, so an
/// entry is indexed under its tag exactly while it is present.
struct Inner {
    entries: LruCache<EntryKey, StoredEntry>,
    tag_index: HashMap<Tag, HashSet<CacheKey>>,
}

impl Inner {
    fn unindex(&mut self, tag: &Tag, key: &CacheKey) {
        if let Some(keys) = self.tag_index.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.tag_index.remove(tag);
            }
        }
    }
}

pub struct MemoryCache {
    inner: RwLock<Inner>,
    supports_tags: bool,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::new(config.capacity_non_zero()),
                tag_index: HashMap::new(),
            }),
            supports_tags: config.supports_tags,
        }
    }

    /// Number of live (possibly expired but not yet collected) entries.
    pub fn len(&self) -> usize {
        rw_read(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries currently indexed under `tag`.
    pub fn tag_len(&self, tag: &Tag) -> usize {
        rw_read(&self.inner, SOURCE, "tag_len")
            .tag_index
            .get(tag)
            .map_or(0, HashSet::len)
    }

    pub fn clear(&self) {
        let mut inner = rw_write(&self.inner, SOURCE, "clear");
        inner.entries.clear();
        inner.tag_index.clear();
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, tag: &Tag, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let entry_key = (tag.clone(), key.clone());
        let now = Instant::now();
        let mut inner = rw_write(&self.inner, SOURCE, "get");
        match inner.entries.get(&entry_key).map(|entry| entry.is_expired(now)) {
            None => Ok(None),
            Some(false) => Ok(inner
                .entries
                .peek(&entry_key)
                .map(|entry| entry.value.clone())),
            Some(true) => {
                inner.entries.pop(&entry_key);
                inner.unindex(tag, key);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        tag: &Tag,
        key: CacheKey,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::backend(format!("ttl {ttl:?} overflows the clock")))?;

        let mut inner = rw_write(&self.inner, SOURCE, "put");
        let evicted = inner.entries.push(
            (tag.clone(), key.clone()),
            StoredEntry { value, expires_at },
        );

        if let Some(((evicted_tag, evicted_key), _)) = evicted {
            // `push` hands back the old value when the key was already present.
            if evicted_tag != *tag || evicted_key != key {
                counter!(METRIC_CACHE_EVICT_TOTAL, "tag" => evicted_tag.to_string()).increment(1);
                inner.unindex(&evicted_tag, &evicted_key);
            }
        }

        inner.tag_index.entry(tag.clone()).or_default().insert(key);
        Ok(())
    }

    async fn flush_tag(&self, tag: &Tag) -> Result<u64, CacheError> {
        let mut inner = rw_write(&self.inner, SOURCE, "flush_tag");
        let keys = inner.tag_index.remove(tag).unwrap_or_default();

        let mut removed = 0;
        for key in keys {
            if inner.entries.pop(&(tag.clone(), key)).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn supports_tags(&self) -> bool {
        self.supports_tags
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cache::keys::derive_key;

    fn tag(name: &str) -> Tag {
        Tag::new(name).expect("valid tag")
    }

    fn key(n: u64) -> CacheKey {
        derive_key("find", &[json!(n)], "")
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let posts = tag("posts");

        assert!(cache.get(&posts, &key(1)).await.expect("get").is_none());
        cache
            .put(&posts, key(1), json!({"title": "A"}), HOUR)
            .await
            .expect("put");

        let cached = cache.get(&posts, &key(1)).await.expect("get");
        assert_eq!(cached, Some(json!({"title": "A"})));
    }

    #[tokio::test]
    async fn same_key_under_other_tag_is_separate() {
        let cache = MemoryCache::new(&CacheConfig::default());
        cache
            .put(&tag("posts"), key(1), json!(1), HOUR)
            .await
            .expect("put");

        assert!(
            cache
                .get(&tag("users"), &key(1))
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn rewriting_a_key_replaces_the_value() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let posts = tag("posts");
        cache.put(&posts, key(1), json!("old"), HOUR).await.expect("put");
        cache.put(&posts, key(1), json!("new"), HOUR).await.expect("put");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.tag_len(&posts), 1);
        assert_eq!(
            cache.get(&posts, &key(1)).await.expect("get"),
            Some(json!("new"))
        );
    }

    #[tokio::test]
    async fn flush_tag_only_touches_that_tag() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let posts = tag("posts");
        let users = tag("users");
        cache.put(&posts, key(1), json!(1), HOUR).await.expect("put");
        cache.put(&posts, key(2), json!(2), HOUR).await.expect("put");
        cache.put(&users, key(1), json!(3), HOUR).await.expect("put");

        assert_eq!(cache.flush_tag(&posts).await.expect("flush"), 2);
        assert!(cache.get(&posts, &key(1)).await.expect("get").is_none());
        assert!(cache.get(&posts, &key(2)).await.expect("get").is_none());
        assert_eq!(cache.get(&users, &key(1)).await.expect("get"), Some(json!(3)));
    }

    #[tokio::test]
    async fn flushing_an_unknown_tag_is_harmless() {
        let cache = MemoryCache::new(&CacheConfig::default());
        assert_eq!(cache.flush_tag(&tag("nothing")).await.expect("flush"), 0);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let posts = tag("posts");
        cache
            .put(&posts, key(1), json!(1), Duration::ZERO)
            .await
            .expect("put");

        assert!(cache.get(&posts, &key(1)).await.expect("get").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.tag_len(&posts), 0);
    }

    #[tokio::test]
    async fn lru_eviction_keeps_tag_index_consistent() {
        let config = CacheConfig {
            capacity: 2,
            ..Default::default()
        };
        let cache = MemoryCache::new(&config);
        let posts = tag("posts");

        cache.put(&posts, key(1), json!(1), HOUR).await.expect("put");
        cache.put(&posts, key(2), json!(2), HOUR).await.expect("put");
        cache.put(&posts, key(3), json!(3), HOUR).await.expect("put");

        assert!(cache.get(&posts, &key(1)).await.expect("get").is_none());
        assert_eq!(cache.tag_len(&posts), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_expiry_and_rewrite_stay_flushable() {
        let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
        let posts = tag("posts");

        for round in 0..2_000u64 {
            cache
                .put(&posts, key(1), json!(0), Duration::ZERO)
                .await
                .expect("put expired");

            let reader = {
                let cache = Arc::clone(&cache);
                let posts = posts.clone();
                tokio::spawn(async move { cache.get(&posts, &key(1)).await })
            };
            let writer = {
                let cache = Arc::clone(&cache);
                let posts = posts.clone();
                tokio::spawn(async move { cache.put(&posts, key(1), json!(1), HOUR).await })
            };
            reader.await.expect("reader task").expect("get");
            writer.await.expect("writer task").expect("put");

            cache.flush_tag(&posts).await.expect("flush");
            assert!(cache.is_empty(), "round {round}: entry survived flush_tag");
            assert!(
                cache.get(&posts, &key(1)).await.expect("get").is_none(),
                "round {round}: stale read after flush"
            );
        }
    }

    #[test]
    fn capability_follows_config() {
        let tagless = MemoryCache::new(&CacheConfig {
            supports_tags: false,
            ..Default::default()
        });
        assert!(!tagless.supports_tags());
        assert!(MemoryCache::new(&CacheConfig::default()).supports_tags());
    }
}
