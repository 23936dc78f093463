//! Tag-scoped query-result cache.
//!
//! - **Keys** ([`derive_key`]): SHA-256 over operation, plain parameters and
//!   query signature.
//! - **Gateway** ([`CacheGateway`]): read-through caching under a [`Tag`] and
//!   tag-wide invalidation, degrading to pass-through on backends without
//!   tag support.
//! - **Backends** ([`CacheBackend`]): [`MemoryCache`] is the in-process LRU
//!   implementation.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 3600
//! capacity = 1024
//! supports_tags = true
//! ```

mod backend;
mod config;
mod gateway;
mod keys;
pub(crate) mod lock;
mod memory;

pub use backend::{CacheBackend, CacheError};
pub use config::CacheConfig;
pub use gateway::{CacheGateway, GatewayMode};
pub use keys::{CacheKey, Tag, derive_key};
pub use memory::MemoryCache;
