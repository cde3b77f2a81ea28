//! Error types for the relationship indexer repository.
mod repository;

pub use repository::RepositoryError;
