//! Startup catch-up from the event log into the publisher.

use std::collections::HashMap;

use common::AggregateId;
use domain::{Money, OrderEvent};
use event_store::EventStore;
use futures_util::StreamExt;

use crate::bus::MessageBus;
use crate::dead_letter::DeadLetterSink;
use crate::error::Result;
use crate::message::{DomainMessage, OutboxRecord};
use crate::publisher::OutboxPublisher;

/// Re-derives outbox records from the full event log.
///
/// Run before accepting traffic so that records appended by a previous
/// process but never published go out first. Records the publisher has
/// already checkpointed are skipped by the publisher itself.
pub struct OutboxRelay<S, B, D> {
    store: S,
    publisher: OutboxPublisher<B, D>,
}

impl<S, B, D> OutboxRelay<S, B, D>
where
    S: EventStore,
    B: MessageBus,
    D: DeadLetterSink,
{
    pub fn new(store: S, publisher: OutboxPublisher<B, D>) -> Self {
        Self { store, publisher }
    }

    /// Streams every stored event and enqueues the publishable ones.
    ///
    /// Returns the number of records enqueued.
    pub async fn run_catch_up(&self) -> Result<usize> {
        let mut stream = self.store.stream_all_events().await?;
        let mut totals: HashMap<AggregateId, Money> = HashMap::new();
        let mut enqueued = 0;

        while let Some(result) = stream.next().await {
            let envelope = result?;
            let event: OrderEvent = envelope.decode()?;
            if let OrderEvent::Created(data) = &event {
                totals.insert(envelope.aggregate_id, data.total_amount);
            }

            let total = totals.get(&envelope.aggregate_id).copied();
            if let Some(message) = DomainMessage::from_event(envelope.aggregate_id, event, total) {
                self.publisher.enqueue([OutboxRecord::new(&envelope, message)])?;
                enqueued += 1;
            }
        }

        tracing::info!(records_enqueued = enqueued, "outbox catch-up complete");
        Ok(enqueued)
    }
}
