//! Routes inbound payment results into the saga controller.
//!
//! A message is acknowledged only after the event it causes is durable.
//! Storage failures leave it for redelivery; duplicates and late arrivals
//! are absorbed by the controller's terminal-state guard.

use event_store::EventStore;
use outbox::{DeadLetterSink, MessageBus};
use tokio::sync::{mpsc, oneshot};

use crate::controller::{PaymentOutcome, SagaController};
use crate::error::SagaError;
use crate::inbound::PaymentEvent;

/// Settlement of one delivery, as reported to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ack,
    /// Not processed; redeliver when `requeue` is set.
    Nack { requeue: bool },
    /// Never processable; drop without redelivery.
    Reject,
}

impl Acknowledgement {
    fn outcome(&self) -> &'static str {
        match self {
            Acknowledgement::Ack => "ack",
            Acknowledgement::Nack { .. } => "nack",
            Acknowledgement::Reject => "reject",
        }
    }
}

/// One message handed over by the transport.
#[derive(Debug)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Acknowledgement>,
}

impl Delivery {
    pub fn new(
        routing_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> (Self, oneshot::Receiver<Acknowledgement>) {
        let (reply, ack) = oneshot::channel();
        (
            Self {
                routing_key: routing_key.into(),
                payload,
                reply,
            },
            ack,
        )
    }
}

pub struct InboundDispatcher<S: EventStore, B, D> {
    controller: SagaController<S, B, D>,
}

impl<S: EventStore, B, D> Clone for InboundDispatcher<S, B, D> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

impl<S, B, D> InboundDispatcher<S, B, D>
where
    S: EventStore + 'static,
    B: MessageBus,
    D: DeadLetterSink,
{
    pub fn new(controller: SagaController<S, B, D>) -> Self {
        Self { controller }
    }

    /// Processes one message and decides how to settle it.
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle(&self, routing_key: &str, payload: &[u8]) -> Acknowledgement {
        let ack = match PaymentEvent::parse(routing_key, payload) {
            Ok(event) => self.apply(event).await,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting inbound message");
                Acknowledgement::Reject
            }
        };
        metrics::counter!("inbound_messages_total", "outcome" => ack.outcome()).increment(1);
        ack
    }

    async fn apply(&self, event: PaymentEvent) -> Acknowledgement {
        let order_id = event.order_id();
        let result = match event {
            PaymentEvent::Succeeded(message) => {
                self.controller.payment_succeeded(message.into()).await
            }
            PaymentEvent::Failed(message) => self.controller.payment_failed(message.into()).await,
        };

        match result {
            Ok(PaymentOutcome::Applied { status }) => {
                tracing::debug!(%order_id, %status, "payment event applied");
                Acknowledgement::Ack
            }
            Ok(PaymentOutcome::Ignored(_)) => Acknowledgement::Ack,
            Err(e) if e.is_retryable() => {
                tracing::warn!(%order_id, error = %e, "payment event not stored, requeueing");
                Acknowledgement::Nack { requeue: true }
            }
            Err(SagaError::Unavailable) => Acknowledgement::Nack { requeue: true },
            Err(e) => {
                tracing::error!(%order_id, error = %e, "payment event cannot be processed");
                Acknowledgement::Reject
            }
        }
    }

    /// Settles a delivery through its reply channel.
    pub async fn dispatch(&self, delivery: Delivery) {
        let ack = self.handle(&delivery.routing_key, &delivery.payload).await;
        if delivery.reply.send(ack).is_err() {
            tracing::debug!(routing_key = %delivery.routing_key, "delivery settled after transport went away");
        }
    }

    /// Consumes deliveries until the channel closes, each in its own task.
    pub async fn run(self, mut deliveries: mpsc::Receiver<Delivery>) {
        tracing::info!("inbound dispatcher started");
        while let Some(delivery) = deliveries.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.dispatch(delivery).await });
        }
        tracing::info!("inbound dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use domain::{Aggregate, OrderItem, OrderStatus, UserId};
    use event_store::InMemoryEventStore;
    use outbox::{InMemoryDeadLetterQueue, InMemoryMessageBus, OutboxPublisher, RetryPolicy};

    use crate::inbound::{PAYMENT_FAILED, PAYMENT_SUCCEEDED};

    type TestDispatcher =
        InboundDispatcher<InMemoryEventStore, InMemoryMessageBus, InMemoryDeadLetterQueue>;

    fn dispatcher(store: InMemoryEventStore) -> TestDispatcher {
        let publisher = OutboxPublisher::new(
            InMemoryMessageBus::new(),
            InMemoryDeadLetterQueue::new(),
            RetryPolicy::default(),
        );
        InboundDispatcher::new(SagaController::new(store, publisher))
    }

    async fn pending(dispatcher: &TestDispatcher) -> AggregateId {
        dispatcher
            .controller
            .create_order(UserId::new(1), vec![OrderItem::new(1, 1, 10.0)])
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    fn payload(order_id: AggregateId) -> Vec<u8> {
        format!(r#"{{"orderId":"{order_id}","userId":1}}"#).into_bytes()
    }

    #[tokio::test]
    async fn success_is_acked_after_append() {
        let dispatcher = dispatcher(InMemoryEventStore::new());
        let order_id = pending(&dispatcher).await;

        let ack = dispatcher.handle(PAYMENT_SUCCEEDED, &payload(order_id)).await;

        assert_eq!(ack, Acknowledgement::Ack);
        let order = dispatcher.controller.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[tokio::test]
    async fn duplicate_is_acked_without_change() {
        let dispatcher = dispatcher(InMemoryEventStore::new());
        let order_id = pending(&dispatcher).await;

        dispatcher.handle(PAYMENT_FAILED, &payload(order_id)).await;
        let ack = dispatcher.handle(PAYMENT_FAILED, &payload(order_id)).await;

        assert_eq!(ack, Acknowledgement::Ack);
        assert_eq!(dispatcher.controller.order_events(order_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn storage_failure_is_requeued() {
        let store = InMemoryEventStore::new();
        let dispatcher = dispatcher(store.clone());
        let order_id = pending(&dispatcher).await;

        store.set_fail_on_append(true);
        let ack = dispatcher.handle(PAYMENT_SUCCEEDED, &payload(order_id)).await;
        assert_eq!(ack, Acknowledgement::Nack { requeue: true });

        store.set_fail_on_append(false);
        let ack = dispatcher.handle(PAYMENT_SUCCEEDED, &payload(order_id)).await;
        assert_eq!(ack, Acknowledgement::Ack);
        let order = dispatcher.controller.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[tokio::test]
    async fn malformed_message_is_rejected() {
        let dispatcher = dispatcher(InMemoryEventStore::new());
        assert_eq!(
            dispatcher.handle(PAYMENT_SUCCEEDED, b"not json").await,
            Acknowledgement::Reject
        );
        assert_eq!(
            dispatcher.handle("order.shipped", b"{}").await,
            Acknowledgement::Reject
        );
    }

    #[tokio::test]
    async fn run_settles_every_delivery() {
        let dispatcher = dispatcher(InMemoryEventStore::new());
        let order_id = pending(&dispatcher).await;
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(dispatcher.clone().run(rx));

        let (delivery, ack) = Delivery::new(PAYMENT_SUCCEEDED, payload(order_id));
        tx.send(delivery).await.unwrap();
        assert_eq!(ack.await.unwrap(), Acknowledgement::Ack);

        drop(tx);
        runner.await.unwrap();
    }
}
