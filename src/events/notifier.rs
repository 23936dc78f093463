//! Lifecycle notifications and cache invalidation around store mutations.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::bus::EventBus;
use super::types::{EventEnvelope, Lifecycle};
use crate::application::query::{Columns, QueryState};
use crate::application::repos::{EntityStore, MutationOutcome, RepoError};
use crate::cache::{CacheGateway, Tag};
use crate::domain::entities::{Attributes, Entity, Target};

/// Runs create, update and delete against the store, bracketed by
/// `<tag>.entity.<verb>ing` / `<tag>.entity.<verb>ed` events.
///
/// A successful mutation invalidates the tag and publishes
/// `<tag>.cache.flushed` before the call returns. A failed one leaves the
/// cache untouched and publishes no `...ed` event.
pub struct MutationNotifier<E, S> {
    tag: Tag,
    store: Arc<S>,
    gateway: Arc<CacheGateway>,
    bus: Arc<EventBus>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S> MutationNotifier<E, S>
where
    E: Entity,
    S: EntityStore<E>,
{
    pub fn new(tag: Tag, store: Arc<S>, gateway: Arc<CacheGateway>, bus: Arc<EventBus>) -> Self {
        Self {
            tag,
            store,
            gateway,
            bus,
            _entity: PhantomData,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    #[instrument(skip_all, fields(tag = %self.tag, operation = "create"))]
    pub async fn create(&self, attributes: Attributes) -> Result<E, RepoError> {
        let payload = Value::Object(attributes.clone());
        self.emit(Lifecycle::Creating, None, payload.clone());

        let created = self.store.create(attributes).await?;

        self.emit(Lifecycle::Created, plain(&created), payload);
        self.flush().await;
        Ok(created)
    }

    /// Update the target. A target with no current row yields
    /// `(false, None)` without any events. A row that disappears between
    /// the `updating` event and the store write also yields `(false, None)`.
    #[instrument(skip_all, fields(tag = %self.tag, operation = "update"))]
    pub async fn update(
        &self,
        target: Target<E>,
        attributes: Attributes,
    ) -> Result<MutationOutcome<E>, RepoError> {
        let Some(current) = self.locate(target).await? else {
            return Ok(MutationOutcome::missing());
        };

        let payload = Value::Object(attributes.clone());
        self.emit(Lifecycle::Updating, plain(&current), payload.clone());

        let updated = match self.store.update(&current, attributes).await {
            Ok(updated) => updated,
            Err(RepoError::NotFound) => {
                debug!(tag = %self.tag, id = %current.id(), "Update target vanished");
                return Ok(MutationOutcome::missing());
            }
            Err(err) => return Err(err),
        };

        self.emit(Lifecycle::Updated, plain(&updated), payload);
        self.flush().await;
        Ok(MutationOutcome::succeeded(updated))
    }

    /// Delete the target. A target with no current row yields
    /// `(false, None)` without any events; a store that declines the delete
    /// yields `(false, Some(entity))` and no `deleted` event.
    #[instrument(skip_all, fields(tag = %self.tag, operation = "delete"))]
    pub async fn delete(&self, target: Target<E>) -> Result<MutationOutcome<E>, RepoError> {
        let Some(current) = self.locate(target).await? else {
            return Ok(MutationOutcome::missing());
        };

        let entity = plain(&current);
        self.emit(Lifecycle::Deleting, entity.clone(), Value::Null);

        let removed = match self.store.delete(&current).await {
            Ok(removed) => removed,
            Err(RepoError::NotFound) => {
                debug!(tag = %self.tag, id = %current.id(), "Delete target vanished");
                return Ok(MutationOutcome::missing());
            }
            Err(err) => return Err(err),
        };

        if !removed {
            info!(tag = %self.tag, id = %current.id(), "Store declined delete");
            return Ok(MutationOutcome::declined(current));
        }

        self.emit(Lifecycle::Deleted, entity, Value::Null);
        self.flush().await;
        Ok(MutationOutcome::succeeded(current))
    }

    /// Invalidate every cached read under the tag and publish
    /// `<tag>.cache.flushed`. Returns the number of entries removed.
    pub async fn flush(&self) -> u64 {
        let removed = self.gateway.invalidate_tag(&self.tag).await;
        self.emit(
            Lifecycle::CacheFlushed,
            None,
            serde_json::json!({ "removed": removed }),
        );
        removed
    }

    /// Current row for the target, read from the store. A loaded entity is
    /// re-read too so a row deleted since it was loaded emits nothing.
    async fn locate(&self, target: Target<E>) -> Result<Option<E>, RepoError> {
        let id = match target {
            Target::Entity(entity) => entity.id(),
            Target::Id(id) => id,
        };
        match self
            .store
            .find(id, &Columns::all(), &QueryState::default())
            .await
        {
            Err(RepoError::NotFound) => Ok(None),
            other => other,
        }
    }

    fn emit(&self, lifecycle: Lifecycle, entity: Option<Value>, payload: Value) {
        let envelope = EventEnvelope::new(lifecycle, &self.tag, entity, payload);
        let delivery = self.bus.publish(&envelope);
        info!(
            tag = %self.tag,
            event = %envelope.name,
            subscribers = delivery.matched,
            failed = delivery.failed,
            "Lifecycle event emitted"
        );
    }
}

fn plain<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "Entity could not be converted to plain data for an event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::application::pagination::{Paginated, ResolvedPage};
    use crate::application::query::Predicate;
    use crate::cache::{CacheBackend, CacheConfig, MemoryCache, derive_key};
    use crate::domain::entities::{EntityId, attributes};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        body: String,
    }

    impl Entity for Note {
        fn id(&self) -> EntityId {
            EntityId(self.id)
        }
    }

    #[derive(Default)]
    struct NoteStore {
        notes: Mutex<BTreeMap<i64, Note>>,
        decline_deletes: bool,
    }

    #[async_trait]
    impl EntityStore<Note> for NoteStore {
        async fn find(
            &self,
            id: EntityId,
            _: &Columns,
            _: &QueryState,
        ) -> Result<Option<Note>, RepoError> {
            Ok(self.notes.lock().expect("notes").get(&id.get()).cloned())
        }

        async fn first(
            &self,
            _: &[Predicate],
            _: &Columns,
            _: &QueryState,
        ) -> Result<Option<Note>, RepoError> {
            Ok(self.notes.lock().expect("notes").values().next().cloned())
        }

        async fn list(
            &self,
            _: &[Predicate],
            _: &Columns,
            _: &QueryState,
        ) -> Result<Vec<Note>, RepoError> {
            Ok(self.notes.lock().expect("notes").values().cloned().collect())
        }

        async fn pluck(&self, _: &str, _: &QueryState) -> Result<Vec<Value>, RepoError> {
            Ok(Vec::new())
        }

        async fn pluck_keyed(
            &self,
            _: &str,
            _: &str,
            _: &QueryState,
        ) -> Result<BTreeMap<String, Value>, RepoError> {
            Ok(BTreeMap::new())
        }

        async fn paginate(
            &self,
            page: &ResolvedPage,
            _: &Columns,
            _: &QueryState,
        ) -> Result<Paginated<Note>, RepoError> {
            Ok(Paginated::new(Vec::new(), 0, page))
        }

        async fn create(&self, attributes: Attributes) -> Result<Note, RepoError> {
            let body = attributes
                .get("body")
                .and_then(Value::as_str)
                .filter(|body| !body.is_empty())
                .ok_or_else(|| RepoError::validation("body is required"))?;
            let mut notes = self.notes.lock().expect("notes");
            let note = Note {
                id: notes.len() as i64 + 1,
                body: body.to_string(),
            };
            notes.insert(note.id, note.clone());
            Ok(note)
        }

        async fn update(&self, entity: &Note, attributes: Attributes) -> Result<Note, RepoError> {
            let mut notes = self.notes.lock().expect("notes");
            let note = notes.get_mut(&entity.id).ok_or(RepoError::NotFound)?;
            if let Some(body) = attributes.get("body").and_then(Value::as_str) {
                note.body = body.to_string();
            }
            Ok(note.clone())
        }

        async fn delete(&self, entity: &Note) -> Result<bool, RepoError> {
            if self.decline_deletes {
                return Ok(false);
            }
            Ok(self.notes.lock().expect("notes").remove(&entity.id).is_some())
        }
    }

    struct Harness {
        notifier: MutationNotifier<Note, NoteStore>,
        cache: Arc<MemoryCache>,
        events: Arc<Mutex<Vec<String>>>,
    }

    fn harness(store: NoteStore) -> Harness {
        let config = CacheConfig::default();
        let cache = Arc::new(MemoryCache::new(&config));
        let gateway = Arc::new(CacheGateway::new(config, cache.clone()));
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe("notes.*", move |event| {
            sink.lock().expect("events").push(event.name.clone());
            Ok(())
        });

        Harness {
            notifier: MutationNotifier::new(
                Tag::new("notes").expect("tag"),
                Arc::new(store),
                gateway,
                bus,
            ),
            cache,
            events,
        }
    }

    async fn seed_cache(harness: &Harness) {
        let tag = Tag::new("notes").expect("tag");
        let key = derive_key("findAll", &[json!(["*"])], "");
        harness
            .cache
            .put(&tag, key, json!([]), std::time::Duration::from_secs(60))
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn create_emits_both_events_then_flushes() {
        let harness = harness(NoteStore::default());
        seed_cache(&harness).await;

        let note = harness
            .notifier
            .create(attributes([("body", "hello")]))
            .await
            .expect("create");

        assert_eq!(note.body, "hello");
        assert_eq!(
            *harness.events.lock().expect("events"),
            vec!["notes.entity.creating", "notes.entity.created", "notes.cache.flushed"]
        );
        assert!(harness.cache.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_keeps_cache_and_skips_created() {
        let harness = harness(NoteStore::default());
        seed_cache(&harness).await;

        let err = harness
            .notifier
            .create(attributes([("body", "")]))
            .await
            .expect_err("validation");

        assert!(matches!(err, RepoError::Validation { .. }));
        assert_eq!(
            *harness.events.lock().expect("events"),
            vec!["notes.entity.creating"]
        );
        assert_eq!(harness.cache.len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_a_soft_failure() {
        let harness = harness(NoteStore::default());

        let outcome = harness
            .notifier
            .update(Target::id(42), attributes([("body", "x")]))
            .await
            .expect("update");

        assert_eq!(outcome.into_pair(), (false, None));
        assert!(harness.events.lock().expect("events").is_empty());
    }

    #[tokio::test]
    async fn vanished_entity_targets_emit_nothing() {
        let harness = harness(NoteStore::default());
        let note = harness
            .notifier
            .create(attributes([("body", "fleeting")]))
            .await
            .expect("create");
        harness.notifier.delete(Target::id(1)).await.expect("delete");
        seed_cache(&harness).await;
        harness.events.lock().expect("events").clear();

        let updated = harness
            .notifier
            .update(Target::entity(note.clone()), attributes([("body", "x")]))
            .await
            .expect("update");
        let deleted = harness
            .notifier
            .delete(Target::entity(note))
            .await
            .expect("delete");

        assert_eq!(updated.into_pair(), (false, None));
        assert_eq!(deleted.into_pair(), (false, None));
        assert!(harness.events.lock().expect("events").is_empty());
        assert_eq!(harness.cache.len(), 1);
    }

    #[tokio::test]
    async fn update_by_id_locates_and_emits() {
        let harness = harness(NoteStore::default());
        harness
            .notifier
            .create(attributes([("body", "before")]))
            .await
            .expect("create");
        harness.events.lock().expect("events").clear();

        let outcome = harness
            .notifier
            .update(Target::id(1), attributes([("body", "after")]))
            .await
            .expect("update");

        assert!(outcome.success);
        assert_eq!(outcome.entity.map(|note| note.body), Some("after".to_string()));
        assert_eq!(
            *harness.events.lock().expect("events"),
            vec!["notes.entity.updating", "notes.entity.updated", "notes.cache.flushed"]
        );
    }

    #[tokio::test]
    async fn declined_delete_returns_entity_without_deleted_event() {
        let store = NoteStore {
            decline_deletes: true,
            ..NoteStore::default()
        };
        let harness = harness(store);
        let note = harness
            .notifier
            .create(attributes([("body", "keep")]))
            .await
            .expect("create");
        seed_cache(&harness).await;
        harness.events.lock().expect("events").clear();

        let outcome = harness
            .notifier
            .delete(Target::entity(note.clone()))
            .await
            .expect("delete");

        assert_eq!(outcome.into_pair(), (false, Some(note)));
        assert_eq!(
            *harness.events.lock().expect("events"),
            vec!["notes.entity.deleting"]
        );
        assert_eq!(harness.cache.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_and_flushes() {
        let harness = harness(NoteStore::default());
        harness
            .notifier
            .create(attributes([("body", "gone")]))
            .await
            .expect("create");
        seed_cache(&harness).await;

        let outcome = harness.notifier.delete(Target::id(1)).await.expect("delete");

        assert!(outcome.success);
        assert!(harness.cache.is_empty());
        assert_eq!(
            harness.notifier.delete(Target::id(1)).await.expect("delete").into_pair(),
            (false, None)
        );
    }
}
