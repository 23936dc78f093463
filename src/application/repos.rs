//! Store trait describing the persistence adapter behind a repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::application::pagination::{Paginated, PaginationError, ResolvedPage};
use crate::application::query::{Columns, Predicate, QueryState};
use crate::domain::entities::{Attributes, Entity, EntityId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Persistence collaborator for one entity type.
///
/// Reads receive the pending [`QueryState`]; implementations apply its
/// ordering and attach its eager-loaded relationships to every returned
/// entity.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    async fn find(
        &self,
        id: EntityId,
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Option<E>, RepoError>;

    /// First entity matching every predicate.
    async fn first(
        &self,
        predicates: &[Predicate],
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Option<E>, RepoError>;

    /// All entities matching every predicate.
    async fn list(
        &self,
        predicates: &[Predicate],
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Vec<E>, RepoError>;

    async fn pluck(&self, column: &str, query: &QueryState) -> Result<Vec<Value>, RepoError>;

    /// `value_column` values keyed by the string form of `key_column`.
    async fn pluck_keyed(
        &self,
        value_column: &str,
        key_column: &str,
        query: &QueryState,
    ) -> Result<BTreeMap<String, Value>, RepoError>;

    async fn paginate(
        &self,
        page: &ResolvedPage,
        columns: &Columns,
        query: &QueryState,
    ) -> Result<Paginated<E>, RepoError>;

    async fn create(&self, attributes: Attributes) -> Result<E, RepoError>;

    /// Apply `attributes` to an existing entity and return the stored result.
    async fn update(&self, entity: &E, attributes: Attributes) -> Result<E, RepoError>;

    /// Returns `false` when nothing was removed.
    async fn delete(&self, entity: &E) -> Result<bool, RepoError>;

    /// Normalized representation of the query shape, used in cache keys.
    fn query_signature(&self, query: &QueryState) -> String {
        query.signature()
    }
}

/// Status pair returned by mutations: soft failures set `success = false`
/// instead of raising.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome<E> {
    pub success: bool,
    pub entity: Option<E>,
}

impl<E> MutationOutcome<E> {
    pub fn succeeded(entity: E) -> Self {
        Self {
            success: true,
            entity: Some(entity),
        }
    }

    /// Target could not be located.
    pub fn missing() -> Self {
        Self {
            success: false,
            entity: None,
        }
    }

    /// Target was located but the store declined the mutation.
    pub fn declined(entity: E) -> Self {
        Self {
            success: false,
            entity: Some(entity),
        }
    }

    pub fn into_pair(self) -> (bool, Option<E>) {
        (self.success, self.entity)
    }
}
