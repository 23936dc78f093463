use thiserror::Error;

use crate::application::repos::RepoError;
use crate::cache::Tag;

/// Errors surfaced by the repository facade.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{tag}: no entity matched `{operation}`")]
    NotFound { tag: Tag, operation: &'static str },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(RepoError),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    pub fn not_found(tag: &Tag, operation: &'static str) -> Self {
        Self::NotFound {
            tag: tag.clone(),
            operation,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<RepoError> for RepositoryError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::Validation { message } => Self::Validation(message),
            other => Self::Store(other),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
