//! Ordered, retried publishing of outbox records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, MailboxHandler, Mailboxes};
use event_store::Version;

use crate::bus::{MessageBus, OutboundMessage};
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::OutboxRecord;

type Checkpoints = Arc<Mutex<HashMap<AggregateId, Version>>>;

/// Publishes one aggregate's records, one at a time.
pub struct PublishWorker<B, D> {
    bus: B,
    dead_letters: D,
    policy: RetryPolicy,
    checkpoints: Checkpoints,
}

impl<B: MessageBus, D: DeadLetterSink> PublishWorker<B, D> {
    fn checkpoint(&self, aggregate_id: &AggregateId) -> Option<Version> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(aggregate_id)
            .copied()
    }

    fn advance(&self, record: &OutboxRecord) {
        let mut checkpoints = self.checkpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = checkpoints.entry(record.aggregate_id).or_insert(record.version);
        if *entry < record.version {
            *entry = record.version;
        }
    }

    async fn dead_letter(&self, record: OutboxRecord, attempts: u32, error: String) {
        tracing::error!(
            aggregate_id = %record.aggregate_id,
            version = %record.version,
            routing_key = record.routing_key,
            attempts,
            error = %error,
            "outbox record dead-lettered"
        );
        metrics::counter!("outbox_dead_letters_total").increment(1);

        self.advance(&record);
        self.dead_letters
            .store(DeadLetter {
                record,
                attempts,
                last_error: error,
                dead_lettered_at: Utc::now(),
            })
            .await;
    }
}

#[async_trait]
impl<B: MessageBus, D: DeadLetterSink> MailboxHandler<AggregateId, OutboxRecord>
    for PublishWorker<B, D>
{
    async fn handle(&self, aggregate_id: &AggregateId, record: OutboxRecord) {
        if self
            .checkpoint(aggregate_id)
            .is_some_and(|checkpoint| record.version <= checkpoint)
        {
            tracing::debug!(%aggregate_id, version = %record.version, "record already published");
            return;
        }

        let message = match record.body() {
            Ok(body) => OutboundMessage {
                message_id: record.event_id.to_string(),
                routing_key: record.routing_key.to_string(),
                body,
            },
            Err(e) => {
                self.dead_letter(record, 0, e.to_string()).await;
                return;
            }
        };

        let mut attempt = 1;
        loop {
            match self.bus.send(&message).await {
                Ok(()) => {
                    tracing::info!(
                        %aggregate_id,
                        version = %record.version,
                        routing_key = record.routing_key,
                        attempt,
                        "published"
                    );
                    metrics::counter!("outbox_published_total").increment(1);
                    self.advance(&record);
                    return;
                }
                Err(e) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        %aggregate_id,
                        version = %record.version,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "publish failed, retrying"
                    );
                    metrics::counter!("outbox_publish_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.dead_letter(record, attempt, e.to_string()).await;
                    return;
                }
            }
        }
    }
}

/// Publishes outbox records in per-aggregate order.
///
/// Records for one aggregate are sent strictly in enqueue order, and a
/// record is never sent before its predecessor has been published or
/// dead-lettered. Different aggregates publish concurrently. Delivery is
/// at least once; consumers dedupe on the message id.
pub struct OutboxPublisher<B, D> {
    mailboxes: Mailboxes<AggregateId, OutboxRecord, PublishWorker<B, D>>,
}

impl<B, D> Clone for OutboxPublisher<B, D> {
    fn clone(&self) -> Self {
        Self {
            mailboxes: self.mailboxes.clone(),
        }
    }
}

impl<B: MessageBus, D: DeadLetterSink> OutboxPublisher<B, D> {
    pub fn new(bus: B, dead_letters: D, policy: RetryPolicy) -> Self {
        Self {
            mailboxes: Mailboxes::new(PublishWorker {
                bus,
                dead_letters,
                policy,
                checkpoints: Arc::default(),
            }),
        }
    }

    /// Queues records for publication. Returns once queued, not sent.
    pub fn enqueue(&self, records: impl IntoIterator<Item = OutboxRecord>) -> Result<()> {
        for record in records {
            self.mailboxes.send(record.aggregate_id, record)?;
        }
        Ok(())
    }

    /// Highest version published or dead-lettered for the aggregate.
    pub fn checkpoint(&self, aggregate_id: AggregateId) -> Option<Version> {
        self.mailboxes.handler().checkpoint(&aggregate_id)
    }

    pub fn bus(&self) -> &B {
        &self.mailboxes.handler().bus
    }

    pub fn dead_letters(&self) -> &D {
        &self.mailboxes.handler().dead_letters
    }

    /// Waits for everything queued so far to be published or dead-lettered.
    pub async fn flush(&self) {
        self.mailboxes.flush().await;
    }

    /// Stops accepting records and drains what is queued.
    pub async fn shutdown(&self) {
        self.mailboxes.shutdown().await;
    }
}
