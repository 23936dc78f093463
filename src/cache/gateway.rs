//! Cache gateway: read-through caching and tag invalidation.
//!
//! The gateway probes its backend once at construction. A backend without
//! tag-scoped eviction cannot honour invalidation, so the gateway switches to
//! pass-through: every read computes and nothing is stored.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument, warn};

use super::backend::CacheBackend;
use super::config::CacheConfig;
use super::keys::{CacheKey, Tag};

const METRIC_CACHE_HIT_TOTAL: &str = "repocache_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "repocache_cache_miss_total";
const METRIC_CACHE_PASSTHROUGH_TOTAL: &str = "repocache_cache_passthrough_total";
const METRIC_CACHE_INVALIDATE_TOTAL: &str = "repocache_cache_invalidate_total";
const METRIC_CACHE_COMPUTE_MS: &str = "repocache_cache_compute_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Reads are cached per tag and writes flush the tag.
    Tagged,
    /// Backend lacks tag support; reads always compute.
    PassThrough,
    /// Caching switched off in configuration.
    Disabled,
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GatewayMode::Tagged => "tagged",
            GatewayMode::PassThrough => "pass_through",
            GatewayMode::Disabled => "disabled",
        })
    }
}

pub struct CacheGateway {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    mode: GatewayMode,
}

impl CacheGateway {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let mode = if !config.enabled {
            GatewayMode::Disabled
        } else if backend.supports_tags() {
            GatewayMode::Tagged
        } else {
            warn!(
                mode = %GatewayMode::PassThrough,
                "Cache backend does not support tags; repository caching is disabled"
            );
            GatewayMode::PassThrough
        };

        Self {
            backend,
            config,
            mode,
        }
    }

    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the value cached under `(tag, key)`, or compute, store and
    /// return it.
    ///
    /// Errors from `compute` propagate and nothing is stored. Backend
    /// failures only cost the cache: the read still succeeds.
    ///
    /// Concurrent misses on the same key are not coalesced; each caller
    /// computes and the last write wins.
    #[instrument(skip_all, fields(tag = %tag, key = %key, mode = %self.mode))]
    pub async fn read_through<T, F, Fut, E>(
        &self,
        tag: &Tag,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.mode {
            GatewayMode::Tagged => {}
            GatewayMode::PassThrough => {
                info!(
                    tag = %tag,
                    "Cache backend lacks tag support; serving read without cache"
                );
                counter!(METRIC_CACHE_PASSTHROUGH_TOTAL, "tag" => tag.to_string()).increment(1);
                return compute().await;
            }
            GatewayMode::Disabled => return compute().await,
        }

        match self.backend.get(tag, key).await {
            Ok(Some(raw)) => match serde_json::from_value::<T>(raw) {
                Ok(value) => {
                    debug!(tag = %tag, key = %key, "Cache hit");
                    counter!(METRIC_CACHE_HIT_TOTAL, "tag" => tag.to_string()).increment(1);
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        tag = %tag,
                        key = %key,
                        error = %err,
                        "Cached value has an unexpected shape; recomputing"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(tag = %tag, key = %key, error = %err, "Cache lookup failed; recomputing");
            }
        }

        debug!(tag = %tag, key = %key, "Cache miss");
        counter!(METRIC_CACHE_MISS_TOTAL, "tag" => tag.to_string()).increment(1);

        let started_at = Instant::now();
        let value = compute().await?;
        histogram!(METRIC_CACHE_COMPUTE_MS, "tag" => tag.to_string())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        if ttl.is_zero() {
            debug!(tag = %tag, key = %key, "Zero ttl; result not stored");
            return Ok(value);
        }

        match serde_json::to_value(&value) {
            Ok(raw) => {
                if let Err(err) = self.backend.put(tag, key.clone(), raw, ttl).await {
                    warn!(tag = %tag, key = %key, error = %err, "Cache store failed");
                }
            }
            Err(err) => {
                warn!(tag = %tag, key = %key, error = %err, "Result is not cacheable");
            }
        }

        Ok(value)
    }

    /// Remove every entry stored under `tag`. Returns the number removed.
    ///
    /// A no-op in pass-through and disabled modes. Backend failures are
    /// logged, never raised.
    #[instrument(skip_all, fields(tag = %tag, mode = %self.mode))]
    pub async fn invalidate_tag(&self, tag: &Tag) -> u64 {
        match self.mode {
            GatewayMode::Tagged => {}
            GatewayMode::PassThrough => {
                info!(tag = %tag, "Cache backend lacks tag support; invalidation skipped");
                return 0;
            }
            GatewayMode::Disabled => return 0,
        }

        match self.backend.flush_tag(tag).await {
            Ok(removed) => {
                counter!(METRIC_CACHE_INVALIDATE_TOTAL, "tag" => tag.to_string()).increment(1);
                info!(tag = %tag, removed, "Cache tag invalidated");
                removed
            }
            Err(err) => {
                warn!(tag = %tag, error = %err, "Cache tag invalidation failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::backend::CacheError;
    use crate::cache::keys::derive_key;
    use crate::cache::memory::MemoryCache;

    const HOUR: Duration = Duration::from_secs(3600);

    fn tag(name: &str) -> Tag {
        Tag::new(name).expect("valid tag")
    }

    fn key(name: &str) -> CacheKey {
        derive_key(name, &[], "")
    }

    fn tagged_gateway() -> CacheGateway {
        let config = CacheConfig::default();
        let backend = Arc::new(MemoryCache::new(&config));
        CacheGateway::new(config, backend)
    }

    async fn counted_read(
        gateway: &CacheGateway,
        tag: &Tag,
        key: &CacheKey,
        calls: &AtomicUsize,
        value: i64,
    ) -> i64 {
        gateway
            .read_through(tag, key, HOUR, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(value)
            })
            .await
            .expect("infallible")
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let gateway = tagged_gateway();
        let calls = AtomicUsize::new(0);
        let posts = tag("posts");

        assert_eq!(counted_read(&gateway, &posts, &key("k"), &calls, 1).await, 1);
        assert_eq!(counted_read(&gateway, &posts, &key("k"), &calls, 2).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_forces_recompute() {
        let gateway = tagged_gateway();
        let calls = AtomicUsize::new(0);
        let posts = tag("posts");

        counted_read(&gateway, &posts, &key("a"), &calls, 1).await;
        counted_read(&gateway, &posts, &key("b"), &calls, 1).await;
        assert_eq!(gateway.invalidate_tag(&posts).await, 2);

        assert_eq!(counted_read(&gateway, &posts, &key("a"), &calls, 5).await, 5);
        assert_eq!(counted_read(&gateway, &posts, &key("b"), &calls, 6).await, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn invalidation_on_empty_tag_is_safe() {
        let gateway = tagged_gateway();
        assert_eq!(gateway.invalidate_tag(&tag("empty")).await, 0);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let gateway = tagged_gateway();
        let posts = tag("posts");

        let failed: Result<i64, &str> = gateway
            .read_through(&posts, &key("k"), HOUR, || async { Err("boom") })
            .await;
        assert_eq!(failed, Err("boom"));

        let calls = AtomicUsize::new(0);
        assert_eq!(counted_read(&gateway, &posts, &key("k"), &calls, 9).await, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_never_stored() {
        let gateway = tagged_gateway();
        let posts = tag("posts");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            gateway
                .read_through(&posts, &key("k"), Duration::ZERO, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(1)
                })
                .await
                .expect("infallible");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tagless_backend_degrades_to_pass_through() {
        let config = CacheConfig {
            supports_tags: false,
            ..Default::default()
        };
        let backend = Arc::new(MemoryCache::new(&config));
        let gateway = CacheGateway::new(config, backend.clone());
        assert_eq!(gateway.mode(), GatewayMode::PassThrough);

        let posts = tag("posts");
        let calls = AtomicUsize::new(0);
        counted_read(&gateway, &posts, &key("k"), &calls, 1).await;
        counted_read(&gateway, &posts, &key("k"), &calls, 1).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(backend.is_empty());
        assert_eq!(gateway.invalidate_tag(&posts).await, 0);
    }

    #[tokio::test]
    async fn disabled_config_skips_the_backend() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let backend = Arc::new(MemoryCache::new(&config));
        let gateway = CacheGateway::new(config, backend.clone());
        assert_eq!(gateway.mode(), GatewayMode::Disabled);

        let calls = AtomicUsize::new(0);
        counted_read(&gateway, &tag("posts"), &key("k"), &calls, 1).await;
        assert!(backend.is_empty());
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _tag: &Tag, _key: &CacheKey) -> Result<Option<Value>, CacheError> {
            Err(CacheError::backend("connection refused"))
        }

        async fn put(
            &self,
            _tag: &Tag,
            _key: CacheKey,
            _value: Value,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::backend("connection refused"))
        }

        async fn flush_tag(&self, _tag: &Tag) -> Result<u64, CacheError> {
            Err(CacheError::backend("connection refused"))
        }

        fn supports_tags(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn backend_failures_do_not_fail_reads() {
        let gateway = CacheGateway::new(CacheConfig::default(), Arc::new(BrokenBackend));
        let calls = AtomicUsize::new(0);

        assert_eq!(
            counted_read(&gateway, &tag("posts"), &key("k"), &calls, 3).await,
            3
        );
        assert_eq!(gateway.invalidate_tag(&tag("posts")).await, 0);
    }

    #[tokio::test]
    async fn mismatched_cached_shape_is_recomputed() {
        let config = CacheConfig::default();
        let backend = Arc::new(MemoryCache::new(&config));
        let posts = tag("posts");
        backend
            .put(&posts, key("k"), json!("not a number"), HOUR)
            .await
            .expect("seed");

        let gateway = CacheGateway::new(config, backend);
        let calls = AtomicUsize::new(0);
        assert_eq!(counted_read(&gateway, &posts, &key("k"), &calls, 4).await, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
