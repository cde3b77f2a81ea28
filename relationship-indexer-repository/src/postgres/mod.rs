//! PostgreSQL implementation of the persistence gateway.
mod gateway;

pub use gateway::PostgresGateway;
