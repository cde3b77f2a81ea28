//! This module defines and re-exports the interfaces for the persistence gateway.
mod persistence_gateway;

pub use persistence_gateway::PersistenceGateway;
