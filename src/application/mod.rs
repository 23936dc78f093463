//! Application layer: query model, store contract and the repository facade.

pub mod error;
pub mod pagination;
pub mod query;
pub mod repos;
pub mod repository;
