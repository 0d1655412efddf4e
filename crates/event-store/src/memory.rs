use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{
        AppendOptions, EventStore, EventStream, check_append_position, validate_events_for_append,
    },
};

#[derive(Default)]
struct Log {
    /// Every event in append order.
    events: Vec<EventEnvelope>,
    /// Positions in `events` for each aggregate, in version order.
    by_aggregate: HashMap<AggregateId, Vec<usize>>,
}

impl Log {
    fn head(&self, aggregate_id: AggregateId) -> Version {
        self.by_aggregate
            .get(&aggregate_id)
            .and_then(|positions| positions.last())
            .map(|&position| self.events[position].version)
            .unwrap_or_else(Version::initial)
    }

    fn aggregate_events(&self, aggregate_id: AggregateId, from: Version) -> Vec<EventEnvelope> {
        self.by_aggregate
            .get(&aggregate_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| &self.events[position])
                    .filter(|event| event.version >= from)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-memory event store.
///
/// Behaves like the PostgreSQL store, including the gap and concurrency
/// checks. Appends can be made to fail on demand to exercise persistence
/// error paths.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every append fails with [`EventStoreError::Unavailable`]
    /// and stores nothing.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        if self.fail_appends.load(Ordering::SeqCst) {
            tracing::warn!(aggregate_id = %events[0].aggregate_id, "failing append on request");
            return Err(EventStoreError::Unavailable(
                "append rejected by fault injection".to_string(),
            ));
        }

        let aggregate_id = events[0].aggregate_id;
        let mut log = self.log.write().await;
        check_append_position(aggregate_id, log.head(aggregate_id), events[0].version, &options)?;

        let mut head = Version::initial();
        for event in events {
            head = event.version;
            let position = log.events.len();
            log.events.push(event);
            log.by_aggregate
                .entry(aggregate_id)
                .or_default()
                .push(position);
        }

        Ok(head)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        Ok(self
            .log
            .read()
            .await
            .aggregate_events(aggregate_id, Version::first()))
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        Ok(self
            .log
            .read()
            .await
            .aggregate_events(aggregate_id, from_version))
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.log.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .by_aggregate
            .contains_key(&aggregate_id)
            .then(|| log.head(aggregate_id)))
    }
}
