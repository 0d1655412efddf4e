//! Command handling infrastructure.

use std::collections::HashMap;
use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Outcome of a command.
///
/// `events` and `envelopes` are empty when the command was a no-op for the
/// aggregate's current state.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    pub events: Vec<A::Event>,

    /// The envelopes exactly as they were appended.
    pub envelopes: Vec<EventEnvelope>,

    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    /// True when the command appended nothing.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// A request to change one aggregate.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;
}

/// Loads aggregates by folding their log and appends the events that
/// commands produce.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Folds the aggregate's events into its current state.
    ///
    /// An aggregate with no events loads as `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning `None` if it was never created.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// The aggregate's stored events, oldest first.
    pub async fn history(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self.store.get_events_for_aggregate(aggregate_id).await?)
    }

    /// Loads the aggregate, runs `command_fn` against it and appends the
    /// resulting events at the next versions.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute_with_metadata(aggregate_id, HashMap::new(), command_fn)
            .await
    }

    /// Like [`execute`](Self::execute), attaching `metadata` to every
    /// appended envelope.
    pub async fn execute_with_metadata<F>(
        &self,
        aggregate_id: AggregateId,
        metadata: HashMap<String, serde_json::Value>,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                envelopes: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &events, &metadata)?;

        let new_version = self
            .store
            .append(
                envelopes.clone(),
                AppendOptions::expect_version(current_version),
            )
            .await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            envelopes,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            for (key, value) in metadata {
                builder = builder.metadata(key.clone(), value.clone());
            }
            envelopes.push(builder.build()?);
        }

        Ok(envelopes)
    }
}
