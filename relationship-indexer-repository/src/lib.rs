//! # Relationship Indexer Repository
//! This crate provides the persistence gateway used by the relationship
//! indexer. It includes the error type, the `PersistenceGateway` trait, a
//! PostgreSQL implementation and an in-memory implementation for tests and
//! local runs.
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;

pub use errors::RepositoryError;
pub use interfaces::PersistenceGateway;
pub use memory::InMemoryGateway;
pub use postgres::PostgresGateway;
