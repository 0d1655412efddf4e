use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the writer believes the aggregate is at. When set, the append
    /// fails if the log has moved on.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// No expected-version check. The gap check still applies.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the aggregate to have no events.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// A stream of stored events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Append-only, per-aggregate ordered event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for one aggregate, atomically.
    ///
    /// The first event's version must be exactly one past the aggregate's
    /// current version, and the batch must be sequential. A violation, or a
    /// stale `options.expected_version`, fails with `ConcurrencyConflict`
    /// and persists nothing.
    ///
    /// Returns the aggregate's version after the append.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// All events of an aggregate, oldest first. Empty if it has none.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Events of an aggregate with `version >= from_version`, oldest first.
    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Every stored event, in append order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// The aggregate's head version, or `None` if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch is non-empty, targets one aggregate and carries
/// sequential versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must belong to the same aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

/// Checks that a batch starting at `first_new` may be appended to an
/// aggregate currently at `current`.
pub fn check_append_position(
    aggregate_id: AggregateId,
    current: Version,
    first_new: Version,
    options: &AppendOptions,
) -> Result<()> {
    if let Some(expected) = options.expected_version
        && expected != current
    {
        return Err(EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual: current,
        });
    }

    if first_new != current.next() {
        return Err(EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected: first_new.previous(),
            actual: current,
        });
    }

    Ok(())
}
