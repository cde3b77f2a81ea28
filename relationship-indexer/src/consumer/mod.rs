//! Consumer module for the relationship indexer.
//!
//! Defines the broker abstraction the processor is written against and its
//! Kafka implementation.

mod broker;
mod kafka_consumer;

pub use broker::{BrokerClient, BrokerEvent, MessageBatch, RawMessage};
pub use kafka_consumer::KafkaConsumer;
