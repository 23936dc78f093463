//! Mutation lifecycle event types.

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::Tag;

/// Lifecycle stage of a repository mutation.
///
/// The published event name is `<tag>.<suffix>`, e.g. `posts.entity.created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
    /// Every cache entry under the tag was invalidated.
    CacheFlushed,
}

impl Lifecycle {
    pub fn suffix(self) -> &'static str {
        match self {
            Lifecycle::Creating => "entity.creating",
            Lifecycle::Created => "entity.created",
            Lifecycle::Updating => "entity.updating",
            Lifecycle::Updated => "entity.updated",
            Lifecycle::Deleting => "entity.deleting",
            Lifecycle::Deleted => "entity.deleted",
            Lifecycle::CacheFlushed => "cache.flushed",
        }
    }

    pub fn event_name(self, tag: &Tag) -> String {
        format!("{tag}.{}", self.suffix())
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique identifier (UUIDv4).
    pub id: Uuid,
    /// Full event name, `<tag>.<suffix>`.
    pub name: String,
    pub tag: Tag,
    pub lifecycle: Lifecycle,
    /// The entity involved, as plain data, when there is one.
    pub entity: Option<Value>,
    /// Extra data: the attribute payload for creates and updates.
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl EventEnvelope {
    pub fn new(lifecycle: Lifecycle, tag: &Tag, entity: Option<Value>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: lifecycle.event_name(tag),
            tag: tag.clone(),
            lifecycle,
            entity,
            payload,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
