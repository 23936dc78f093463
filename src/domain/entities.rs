//! Entity contract shared by stores, caches and repositories.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Plain attribute payload used for create, update and lookup by attributes.
pub type Attributes = Map<String, Value>;

/// Primary key of a stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record owned by an entity store.
///
/// Entities cross the cache boundary as plain JSON, so they must round-trip
/// through serde without losing information.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> EntityId;
}

/// Target of an update or delete: either a key to look up or an instance the
/// caller already holds.
#[derive(Debug, Clone)]
pub enum Target<E> {
    Id(EntityId),
    Entity(E),
}

impl<E> Target<E> {
    pub fn id(id: i64) -> Self {
        Self::Id(EntityId(id))
    }

    pub fn entity(entity: E) -> Self {
        Self::Entity(entity)
    }
}

impl<E> From<EntityId> for Target<E> {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl<E> From<i64> for Target<E> {
    fn from(id: i64) -> Self {
        Self::Id(EntityId(id))
    }
}

/// Build an attribute map from `(name, value)` pairs.
pub fn attributes<I, K, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}
