use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    AggregateId, NewEvent, Result, Sequence, StoreError, StoredEvent, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

const SELECT_COLUMNS: &str =
    "id, aggregate_id, version, event_kind, payload, timestamp, published_at";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a store over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<StoredEvent> {
        Ok(StoredEvent {
            sequence: Sequence::new(row.try_get("id")?),
            aggregate_id: AggregateId::new(row.try_get::<String, _>("aggregate_id")?),
            version: Version::new(row.try_get("version")?),
            event_kind: row.try_get("event_kind")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(batch = events.len()))]
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Vec<StoredEvent>> {
        validate_events_for_append(aggregate_id, &events)?;

        // Start a transaction
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM cart_events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let current_version = Version::new(current.unwrap_or(0));

        // Check expected version if specified
        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected,
                actual: current_version,
            });
        }

        // Insert all events
        let mut stored = Vec::with_capacity(events.len());
        let mut version = current_version;
        for event in events {
            version = version.next();

            let row = sqlx::query(
                r#"
                INSERT INTO cart_events (aggregate_id, version, event_kind, payload, timestamp)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(aggregate_id.as_str())
            .bind(version.as_i64())
            .bind(&event.event_kind)
            .bind(&event.payload)
            .bind(event.timestamp)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                // A racing writer already took this version
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return StoreError::ConcurrencyConflict {
                        aggregate_id: aggregate_id.clone(),
                        expected: options.expected_version.unwrap_or(current_version),
                        actual: version,
                    };
                }
                StoreError::Database(e)
            })?;

            stored.push(StoredEvent {
                sequence: Sequence::new(row.try_get("id")?),
                aggregate_id: aggregate_id.clone(),
                version,
                event_kind: event.event_kind,
                payload: event.payload,
                timestamp: event.timestamp,
                published_at: None,
            });
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM cart_events WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM cart_events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(Version::new(version.unwrap_or(0)))
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM cart_events WHERE published_at IS NULL ORDER BY id ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_published(&self, sequences: &[Sequence]) -> Result<()> {
        if sequences.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = sequences.iter().map(Sequence::as_i64).collect();
        sqlx::query(
            "UPDATE cart_events SET published_at = NOW() WHERE id = ANY($1) AND published_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
