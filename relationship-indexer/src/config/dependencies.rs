//! Dependency initialization and wiring for the relationship indexer.

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{DatabaseSettings, ProcessorConfig};
use crate::consumer::KafkaConsumer;
use crate::graph::GraphEngine;
use crate::loader::GraphLoader;
use crate::processor::{Processor, ProcessorOptions};
use crate::IndexingError;
use relationship_indexer_repository::PostgresGateway;

/// Connection mode for the persistence gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at a fixed interval until successful.
    Retry,
}

impl ConnectionMode {
    /// Parse connection mode from environment variable.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive)
    /// Defaults to "retry" if not set or invalid.
    pub fn from_env() -> Self {
        Self::parse(&env::var("DATABASE_CONNECTION_MODE").unwrap_or_else(|_| "retry".to_string()))
    }

    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid DATABASE_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured processor ready to run.
    pub processor: Processor,
}

impl Dependencies {
    /// Initialize all dependencies of the stream processor.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If initialization fails (the store only in fail-fast mode)
    pub async fn new(config: &ProcessorConfig) -> Result<Self, IndexingError> {
        info!(
            kafka_broker = %config.kafka.brokers,
            kafka_topic = %config.kafka.topic,
            kafka_group_id = %config.kafka.group_id,
            connection_mode = ?config.database.connection_mode,
            resume = config.resume,
            referral_point_depth = config.referral_point_depth,
            "Initializing dependencies"
        );

        let gateway = connect_gateway(&config.database).await?;
        info!("Database connection established");

        let consumer = KafkaConsumer::new(&config.kafka).map_err(|e| {
            IndexingError::config(format!("Failed to create Kafka consumer: {}", e))
        })?;
        info!("Kafka consumer created");

        let loader = GraphLoader::new(Arc::new(gateway));
        let graph = GraphEngine::with_referral_point_depth(config.referral_point_depth);
        let options = ProcessorOptions {
            resume: config.resume,
            metrics_interval: config.metrics_interval,
        };

        let processor = Processor::new(Arc::new(consumer), loader, graph, options);

        Ok(Self { processor })
    }
}

/// Connect to PostgreSQL with retry logic based on connection mode.
pub async fn connect_gateway(settings: &DatabaseSettings) -> Result<PostgresGateway, IndexingError> {
    connect_with_retry(settings.connection_mode, settings.retry_interval, || {
        PostgresGateway::connect(&settings.url, settings.max_connections)
    })
    .await
}

async fn connect_with_retry<T, E, F, Fut>(
    mode: ConnectionMode,
    retry_interval: Duration,
    mut connect: F,
) -> Result<T, IndexingError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    loop {
        match connect().await {
            Ok(connection) => return Ok(connection),
            Err(e) => match mode {
                ConnectionMode::FailFast => {
                    return Err(IndexingError::config(format!(
                        "Failed to connect to the database: {}",
                        e
                    )));
                }
                ConnectionMode::Retry => {
                    warn!(
                        error = %e,
                        retry_interval_secs = retry_interval.as_secs(),
                        "Failed to connect to the database, retrying..."
                    );
                    sleep(retry_interval).await;
                }
            },
        }
    }
}
