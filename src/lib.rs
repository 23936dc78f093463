//! Repository layer with eager-load scoping, mutation lifecycle events and a
//! tag-scoped query-result cache.
//!
//! A [`Repository`] wraps an [`EntityStore`]. Reads are cached under the
//! repository's [`Tag`] through a [`CacheGateway`]; creates, updates and
//! deletes publish lifecycle events on an [`EventBus`] and invalidate the tag
//! before returning.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod events;
pub mod infra;
pub mod util;

pub use application::error::RepositoryError;
pub use application::pagination::{PageRequest, Paginated};
pub use application::query::{Columns, Conditions, Direction, Operator, QueryState, Select};
pub use application::repos::{EntityStore, MutationOutcome, RepoError};
pub use application::repository::{Repository, RepositoryConfig};
pub use cache::{CacheBackend, CacheConfig, CacheGateway, GatewayMode, MemoryCache, Tag};
pub use domain::entities::{Attributes, Entity, EntityId, Target, attributes};
pub use events::{EventBus, EventEnvelope, Lifecycle};
pub use infra::memory_store::InMemoryStore;
