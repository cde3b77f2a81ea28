//! Stores user records, checkpoints and the raw event log in PostgreSQL.
//!
//! The schema is embedded as a sqlx migration and applied on connect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relationship_indexer_shared::{PersistableUserNode, StoredEvent};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::errors::RepositoryError;
use crate::interfaces::PersistenceGateway;

static MIGRATOR: Migrator = sqlx::migrate!("./src/postgres/migrations");

/// Rows per multi-row upsert. Nine binds per row keeps each statement well
/// under the 65535 bind parameter limit.
const USER_CHUNK_SIZE: usize = 1_000;
/// Rows per multi-row event insert (eight binds per row).
const EVENT_CHUNK_SIZE: usize = 2_000;

#[derive(sqlx::FromRow)]
struct UserRow {
    name: String,
    created_at: Option<String>,
    referred_by: Option<String>,
    referrals: Vec<String>,
    friends: Vec<String>,
    referral_points: i64,
    last_seq: i64,
    referrals_count: i64,
    friends_count: i64,
}

impl From<UserRow> for PersistableUserNode {
    fn from(row: UserRow) -> Self {
        PersistableUserNode {
            name: row.name,
            created_at: row.created_at,
            referred_by: row.referred_by,
            referrals: row.referrals,
            friends: row.friends,
            referral_points: row.referral_points,
            last_seq: row.last_seq,
            referrals_count: row.referrals_count.max(0) as usize,
            friends_count: row.friends_count.max(0) as usize,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    topic: String,
    partition_id: i32,
    log_offset: i64,
    seq: i64,
    event_type: String,
    event_timestamp: Option<DateTime<Utc>>,
    ingested_at: DateTime<Utc>,
    payload: Json<serde_json::Value>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent {
            topic: row.topic,
            partition: row.partition_id,
            offset: row.log_offset,
            seq: row.seq,
            event_type: row.event_type,
            event_timestamp: row.event_timestamp,
            ingested_at: row.ingested_at,
            payload: row.payload.0,
        }
    }
}

/// PostgreSQL-backed persistence gateway.
pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    /// Opens a connection pool and applies pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, applying pending migrations first.
    pub async fn from_pool(pool: PgPool) -> Result<Self, RepositoryError> {
        MIGRATOR.run(&pool).await?;
        info!("Database migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    async fn get_checkpoint(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, RepositoryError> {
        let offset = sqlx::query_scalar::<_, i64>(
            "SELECT log_offset FROM kafka_offsets WHERE topic = $1 AND partition_id = $2",
        )
        .bind(topic)
        .bind(partition)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offset)
    }

    async fn save_checkpoint(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO kafka_offsets (topic, partition_id, log_offset, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (topic, partition_id) \
             DO UPDATE SET log_offset = EXCLUDED.log_offset, updated_at = NOW()",
        )
        .bind(topic)
        .bind(partition)
        .bind(offset)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_all_users(&self) -> Result<Vec<PersistableUserNode>, RepositoryError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT name, created_at, referred_by, referrals, friends, referral_points, \
             last_seq, referrals_count, friends_count \
             FROM relationship_users ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PersistableUserNode::from).collect())
    }

    async fn upsert_users(&self, users: &[PersistableUserNode]) -> Result<(), RepositoryError> {
        if users.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in users.chunks(USER_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO relationship_users (name, created_at, referred_by, referrals, friends, \
                 referral_points, last_seq, referrals_count, friends_count) ",
            );

            query_builder.push_values(chunk, |mut b, user| {
                b.push_bind(user.name.clone());
                b.push_bind(user.created_at.clone());
                b.push_bind(user.referred_by.clone());
                b.push_bind(user.referrals.clone());
                b.push_bind(user.friends.clone());
                b.push_bind(user.referral_points);
                b.push_bind(user.last_seq);
                b.push_bind(user.referrals_count as i64);
                b.push_bind(user.friends_count as i64);
            });

            query_builder.push(
                " ON CONFLICT (name) DO UPDATE SET \
                 created_at = EXCLUDED.created_at, \
                 referred_by = EXCLUDED.referred_by, \
                 referrals = EXCLUDED.referrals, \
                 friends = EXCLUDED.friends, \
                 referral_points = EXCLUDED.referral_points, \
                 last_seq = EXCLUDED.last_seq, \
                 referrals_count = EXCLUDED.referrals_count, \
                 friends_count = EXCLUDED.friends_count, \
                 updated_at = NOW()",
            );

            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(count = users.len(), "Upserted users");

        Ok(())
    }

    async fn append_raw_events(&self, events: &[StoredEvent]) -> Result<u64, RepositoryError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0u64;

        for chunk in events.chunks(EVENT_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO relationship_events (topic, partition_id, log_offset, seq, event_type, \
                 event_timestamp, ingested_at, payload) ",
            );

            query_builder.push_values(chunk, |mut b, event| {
                b.push_bind(event.topic.clone());
                b.push_bind(event.partition);
                b.push_bind(event.offset);
                b.push_bind(event.seq);
                b.push_bind(event.event_type.clone());
                b.push_bind(event.event_timestamp);
                b.push_bind(event.ingested_at);
                b.push_bind(Json(event.payload.clone()));
            });

            query_builder.push(" ON CONFLICT (topic, partition_id, log_offset) DO NOTHING");

            let result = query_builder.build().execute(&self.pool).await?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn count_raw_events(&self) -> Result<u64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM relationship_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn load_raw_events_page(
        &self,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT topic, partition_id, log_offset, seq, event_type, event_timestamp, \
             ingested_at, payload \
             FROM relationship_events ORDER BY id OFFSET $1 LIMIT $2",
        )
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
