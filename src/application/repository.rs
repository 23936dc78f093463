//! Cached, event-emitting repository over an [`EntityStore`].
//!
//! Every read derives a cache key from the operation name, its resolved
//! arguments and the pending query state, then goes through the cache
//! gateway under the repository's tag. Writes go through the
//! [`MutationNotifier`], which invalidates the tag before returning.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::application::error::RepositoryError;
use crate::application::pagination::{DEFAULT_PER_PAGE, PageRequest, Paginated};
use crate::application::query::{
    Columns, Conditions, Direction, IntoRelations, Predicate, QueryState, Select,
};
use crate::application::repos::{EntityStore, MutationOutcome, RepoError};
use crate::cache::{CacheGateway, Tag, derive_key};
use crate::config::RepositoryDefaults;
use crate::domain::entities::{Attributes, Entity, EntityId, Target};
use crate::events::{EventBus, MutationNotifier};

pub const DEFAULT_ORDER_COLUMN: &str = "id";
pub const DEFAULT_ALL_PER_PAGE: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub tag: Tag,
    /// Lifetime of cached reads; `None` uses the gateway default.
    pub ttl: Option<Duration>,
    /// Page size when a [`PageRequest`] leaves it unset.
    pub default_per_page: u32,
}

impl RepositoryConfig {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            ttl: None,
            default_per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Config for `tag` using the `repository` section of the loaded settings.
    pub fn from_defaults(tag: Tag, defaults: &RepositoryDefaults) -> Self {
        Self {
            tag,
            ttl: defaults.ttl,
            default_per_page: defaults.per_page,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn default_per_page(mut self, per_page: u32) -> Self {
        self.default_per_page = per_page;
        self
    }
}

pub struct Repository<E, S> {
    config: RepositoryConfig,
    store: Arc<S>,
    gateway: Arc<CacheGateway>,
    notifier: MutationNotifier<E, S>,
    state: QueryState,
}

impl<E, S> Repository<E, S>
where
    E: Entity,
    S: EntityStore<E>,
{
    pub fn new(
        config: RepositoryConfig,
        store: Arc<S>,
        gateway: Arc<CacheGateway>,
        bus: Arc<EventBus>,
    ) -> Self {
        let notifier = MutationNotifier::new(
            config.tag.clone(),
            Arc::clone(&store),
            Arc::clone(&gateway),
            bus,
        );
        Self {
            config,
            store,
            gateway,
            notifier,
            state: QueryState::default(),
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.config.tag
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Pending eager loads and ordering applied to subsequent reads.
    pub fn scope(&self) -> &QueryState {
        &self.state
    }

    fn ttl(&self) -> Duration {
        self.config.ttl.unwrap_or_else(|| self.gateway.default_ttl())
    }

    // ---- pending query state ----

    /// Eager-load relationships on subsequent reads. Accepts a single name,
    /// a comma-delimited list or a collection; names already pending are
    /// skipped.
    pub fn with(&mut self, relations: impl IntoRelations) -> &mut Self {
        self.state.add_relations(relations);
        self
    }

    pub fn order_by(&mut self, column: impl Into<String>, direction: Direction) -> &mut Self {
        self.state.push_order(column, direction);
        self
    }

    pub fn order_by_asc(&mut self, column: impl Into<String>) -> &mut Self {
        self.order_by(column, Direction::default())
    }

    pub fn reset_scope(&mut self) -> &mut Self {
        self.state.clear();
        self
    }

    // ---- reads ----

    pub async fn find(&self, id: EntityId, select: Select) -> Result<Option<E>, RepositoryError> {
        let query = self.state.merged_with(&select.with);
        let params = vec![json!(id), to_plain(&select.columns)?, json!(select.with)];
        let columns = select.columns;
        self.remember("find", params, &query, || async {
            self.store.find(id, &columns, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    pub async fn find_or_fail(&self, id: EntityId, select: Select) -> Result<E, RepositoryError> {
        let query = self.state.merged_with(&select.with);
        let params = vec![json!(id), to_plain(&select.columns)?, json!(select.with)];
        let columns = select.columns;
        self.remember("findOrFail", params, &query, || async {
            self.store
                .find(id, &columns, &query)
                .await
                .map_err(RepositoryError::from)
                .and_then(|found| {
                    found.ok_or_else(|| RepositoryError::not_found(self.tag(), "findOrFail"))
                })
        })
        .await
    }

    /// First entity whose `attribute` equals `value`.
    pub async fn find_by(
        &self,
        attribute: &str,
        value: impl Into<Value>,
        select: Select,
    ) -> Result<Option<E>, RepositoryError> {
        let value = value.into();
        let params = vec![
            json!(attribute),
            value.clone(),
            to_plain(&select.columns)?,
            json!(select.with),
        ];
        self.first_matching("findBy", params, vec![Predicate::equals(attribute, value)], select)
            .await
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<E>, RepositoryError> {
        self.first_matching(
            "findBySlug",
            vec![json!(slug)],
            vec![Predicate::equals("slug", slug)],
            Select::new(),
        )
        .await
    }

    pub async fn first_or_fail(&self) -> Result<E, RepositoryError> {
        self.first_matching("firstOrFail", Vec::new(), Vec::new(), Select::new())
            .await?
            .ok_or_else(|| RepositoryError::not_found(self.tag(), "firstOrFail"))
    }

    pub async fn find_all(&self, select: Select) -> Result<Vec<E>, RepositoryError> {
        let params = vec![to_plain(&select.columns)?, json!(select.with)];
        self.list_matching("findAll", params, Vec::new(), select).await
    }

    /// Every entity ordered by `order`, `("id", Asc)` when `None`.
    pub async fn get_all(
        &self,
        order: Option<(&str, Direction)>,
    ) -> Result<Vec<E>, RepositoryError> {
        let (column, direction) = order.unwrap_or((DEFAULT_ORDER_COLUMN, Direction::Asc));
        let mut query = self.state.clone();
        query.push_order(column, direction);
        let params = vec![json!(column), json!(direction)];
        let columns = Columns::all();
        self.remember("getAll", params, &query, || async {
            self.store.list(&[], &columns, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    /// Entities satisfying every condition.
    pub async fn find_where(
        &self,
        conditions: &Conditions,
        select: Select,
    ) -> Result<Vec<E>, RepositoryError> {
        // Keyed on the resolved predicates: an array-valued equality and a
        // comparison triple encode identically as raw conditions.
        let predicates = conditions.to_predicates();
        let params = vec![
            to_plain(&predicates)?,
            to_plain(&select.columns)?,
            json!(select.with),
        ];
        self.list_matching("findWhere", params, predicates, select)
            .await
    }

    pub async fn find_where_in(
        &self,
        attribute: &str,
        values: Vec<Value>,
        select: Select,
    ) -> Result<Vec<E>, RepositoryError> {
        let params = vec![
            json!(attribute),
            Value::Array(values.clone()),
            to_plain(&select.columns)?,
            json!(select.with),
        ];
        let predicate = Predicate::In {
            attribute: attribute.to_string(),
            values,
        };
        self.list_matching("findWhereIn", params, vec![predicate], select)
            .await
    }

    pub async fn find_where_not_in(
        &self,
        attribute: &str,
        values: Vec<Value>,
        select: Select,
    ) -> Result<Vec<E>, RepositoryError> {
        let params = vec![
            json!(attribute),
            Value::Array(values.clone()),
            to_plain(&select.columns)?,
            json!(select.with),
        ];
        let predicate = Predicate::NotIn {
            attribute: attribute.to_string(),
            values,
        };
        self.list_matching("findWhereNotIn", params, vec![predicate], select)
            .await
    }

    /// Entities with `low <= attribute <= high`.
    pub async fn find_where_between(
        &self,
        attribute: &str,
        (low, high): (Value, Value),
        select: Select,
    ) -> Result<Vec<E>, RepositoryError> {
        let params = vec![
            json!(attribute),
            json!([low, high]),
            to_plain(&select.columns)?,
            json!(select.with),
        ];
        let predicate = Predicate::Between {
            attribute: attribute.to_string(),
            low,
            high,
        };
        self.list_matching("findWhereBetween", params, vec![predicate], select)
            .await
    }

    /// Values of one column across every entity.
    pub async fn pluck(&self, column: &str) -> Result<Vec<Value>, RepositoryError> {
        let query = self.state.clone();
        self.remember("pluck", vec![json!(column)], &query, || async {
            self.store.pluck(column, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    /// `value_column` keyed by `key_column`, for building select lists.
    pub async fn dropdown(
        &self,
        value_column: &str,
        key_column: &str,
    ) -> Result<BTreeMap<String, Value>, RepositoryError> {
        let query = self.state.clone();
        let params = vec![json!(value_column), json!(key_column)];
        self.remember("dropdown", params, &query, || async {
            self.store
                .pluck_keyed(value_column, key_column, &query)
                .await
                .map_err(RepositoryError::from)
        })
        .await
    }

    pub async fn paginate(
        &self,
        request: PageRequest,
        select: Select,
    ) -> Result<Paginated<E>, RepositoryError> {
        let page = request
            .resolve(self.config.default_per_page)
            .map_err(RepoError::from)?;
        let query = self.state.merged_with(&select.with);
        let params = vec![
            json!(page.per_page),
            to_plain(&select.columns)?,
            json!(page.page_name),
            json!(page.page),
            json!(select.with),
        ];
        let columns = select.columns;
        self.remember("paginate", params, &query, || async {
            self.store.paginate(&page, &columns, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    /// One page of every entity ordered by `order` (`("id", Asc)` when
    /// `None`), 25 per page unless `per_page` is given.
    pub async fn get_all_paginated(
        &self,
        order: Option<(&str, Direction)>,
        per_page: Option<u32>,
        page: Option<u32>,
    ) -> Result<Paginated<E>, RepositoryError> {
        let (column, direction) = order.unwrap_or((DEFAULT_ORDER_COLUMN, Direction::Asc));
        let mut request = PageRequest::default().per_page(per_page.unwrap_or(DEFAULT_ALL_PER_PAGE));
        if let Some(page) = page {
            request = request.page(page);
        }
        let page = request
            .resolve(DEFAULT_ALL_PER_PAGE)
            .map_err(RepoError::from)?;

        let mut query = self.state.clone();
        query.push_order(column, direction);
        let params = vec![
            json!(column),
            json!(direction),
            json!(page.per_page),
            json!(page.page),
        ];
        let columns = Columns::all();
        self.remember("getAllPaginated", params, &query, || async {
            self.store.paginate(&page, &columns, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    // ---- writes ----

    /// Return the first entity equal on every given attribute, creating one
    /// when none exists.
    ///
    /// The lookup and the create are separate steps: two concurrent callers
    /// may both miss and both create.
    pub async fn find_or_create(&self, attributes: Attributes) -> Result<E, RepositoryError> {
        let conditions = Conditions::from(&attributes);
        if let Some(existing) = self
            .find_where(&conditions, Select::new())
            .await?
            .into_iter()
            .next()
        {
            return Ok(existing);
        }
        self.create(attributes).await
    }

    pub async fn create(&self, attributes: Attributes) -> Result<E, RepositoryError> {
        Ok(self.notifier.create(attributes).await?)
    }

    pub async fn update(
        &self,
        target: Target<E>,
        attributes: Attributes,
    ) -> Result<MutationOutcome<E>, RepositoryError> {
        Ok(self.notifier.update(target, attributes).await?)
    }

    pub async fn delete(&self, target: Target<E>) -> Result<MutationOutcome<E>, RepositoryError> {
        Ok(self.notifier.delete(target).await?)
    }

    /// Drop every cached read of this repository.
    pub async fn flush_cache(&self) -> u64 {
        self.notifier.flush().await
    }

    // ---- helpers ----

    async fn first_matching(
        &self,
        operation: &'static str,
        params: Vec<Value>,
        predicates: Vec<Predicate>,
        select: Select,
    ) -> Result<Option<E>, RepositoryError> {
        let query = self.state.merged_with(&select.with);
        let columns = select.columns;
        self.remember(operation, params, &query, || async {
            self.store.first(&predicates, &columns, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    async fn list_matching(
        &self,
        operation: &'static str,
        params: Vec<Value>,
        predicates: Vec<Predicate>,
        select: Select,
    ) -> Result<Vec<E>, RepositoryError> {
        let query = self.state.merged_with(&select.with);
        let columns = select.columns;
        self.remember(operation, params, &query, || async {
            self.store.list(&predicates, &columns, &query).await.map_err(RepositoryError::from)
        })
        .await
    }

    async fn remember<T, F, Fut>(
        &self,
        operation: &'static str,
        params: Vec<Value>,
        query: &QueryState,
        compute: F,
    ) -> Result<T, RepositoryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let key = derive_key(operation, &params, &self.store.query_signature(query));
        self.gateway
            .read_through(self.tag(), &key, self.ttl(), compute)
            .await
    }
}

/// Convert a call argument to plain data for key derivation.
pub fn to_plain<T: Serialize + ?Sized>(value: &T) -> Result<Value, RepositoryError> {
    serde_json::to_value(value).map_err(|err| RepositoryError::serialization(err.to_string()))
}
