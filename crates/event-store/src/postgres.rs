use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version,
    store::{
        AppendOptions, EventStore, EventStream, check_append_position, validate_events_for_append,
    },
};

macro_rules! select_events {
    ($tail:literal) => {
        concat!(
            "SELECT position, id, event_type, aggregate_id, aggregate_type, version, recorded_at, payload, metadata FROM events ",
            $tail
        )
    };
}

/// Rows fetched per round trip by [`EventStore::stream_all_events`].
pub const DEFAULT_STREAM_PAGE_SIZE: i64 = 500;

/// PostgreSQL-backed event store.
///
/// Events live in a single `events` table. `(aggregate_id, version)` is
/// unique, and a trigger rejects UPDATE and DELETE so the table stays
/// append-only.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    stream_page_size: i64,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            stream_page_size: DEFAULT_STREAM_PAGE_SIZE,
        }
    }

    /// Overrides how many rows `stream_all_events` holds in memory at once.
    pub fn with_stream_page_size(mut self, page_size: i64) -> Self {
        self.stream_page_size = page_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    /// One keyset page of the log after `after`, plus the cursor for the
    /// next page. A short page ends the stream.
    async fn next_page(
        pool: PgPool,
        page_size: i64,
        after: Option<i64>,
    ) -> Result<Option<(Vec<Result<EventEnvelope>>, (PgPool, Option<i64>))>> {
        let Some(after) = after else {
            return Ok(None);
        };

        let rows = sqlx::query(select_events!(
            "WHERE position > $1 ORDER BY position ASC LIMIT $2"
        ))
        .bind(after)
        .bind(page_size)
        .fetch_all(&pool)
        .await?;

        let Some(last) = rows.last() else {
            return Ok(None);
        };
        let last: i64 = last.try_get("position")?;
        let cursor = (rows.len() as i64 == page_size).then_some(last);

        let events = rows.into_iter().map(Self::row_to_event).collect();
        Ok(Some((events, (pool, cursor))))
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let current = Version::new(current.unwrap_or(0));
        check_append_position(aggregate_id, current, events[0].version, &options)?;

        let mut head = current;
        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, recorded_at, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A concurrent writer got the same sequence number first.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: current,
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            head = event.version;
        }

        tx.commit().await?;
        tracing::debug!(%aggregate_id, version = %head, count = events.len(), "events appended");
        Ok(head)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(select_events!(
            "WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(select_events!(
            "WHERE aggregate_id = $1 AND version >= $2 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .bind(from_version.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::{TryStreamExt, stream};

        let page_size = self.stream_page_size;
        let pages = stream::try_unfold(
            (self.pool.clone(), Some(0_i64)),
            move |(pool, after)| Self::next_page(pool, page_size, after),
        );

        Ok(Box::pin(pages.map_ok(stream::iter).try_flatten()))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}
