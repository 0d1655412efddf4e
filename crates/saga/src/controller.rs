//! Saga controller: the single writer for every order.
//!
//! Commands are routed to a per-order mailbox, so all mutations of one
//! order run one after another even when callers race. Distinct orders
//! proceed concurrently. Outbound messages are queued on the outbox only
//! after the events behind them are stored.

use async_trait::async_trait;
use common::{AggregateId, MailboxHandler, Mailboxes};
use domain::{
    Aggregate, CancelOrder, CommandResult, CreateOrder, MarkPaid, Order, OrderItem, OrderService,
    OrderStatus, UserId,
};
use event_store::{EventEnvelope, EventStore};
use outbox::{DeadLetterSink, MessageBus, OutboxPublisher, OutboxRecord};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{Result, SagaError};
use crate::user_orders::UserOrdersIndex;

/// Why a payment event changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Anomaly {
    /// No order exists with that id.
    UnknownOrder,
    /// The order already reached a terminal status.
    AlreadyTerminal { status: OrderStatus },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::UnknownOrder => write!(f, "unknown order"),
            Anomaly::AlreadyTerminal { status } => write!(f, "order already {status}"),
        }
    }
}

/// Result of delivering a payment event to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Applied { status: OrderStatus },
    Ignored(Anomaly),
}

impl PaymentOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PaymentOutcome::Applied { .. })
    }
}

enum OrderCommand {
    Create {
        command: CreateOrder,
        reply: oneshot::Sender<Result<Order>>,
    },
    PaymentSucceeded {
        command: MarkPaid,
        reply: oneshot::Sender<Result<PaymentOutcome>>,
    },
    PaymentFailed {
        command: CancelOrder,
        reply: oneshot::Sender<Result<PaymentOutcome>>,
    },
}

/// Executes commands for one order at a time.
struct OrderWorker<S: EventStore, B, D> {
    service: OrderService<S>,
    publisher: OutboxPublisher<B, D>,
    user_orders: UserOrdersIndex,
}

impl<S, B, D> OrderWorker<S, B, D>
where
    S: EventStore + 'static,
    B: MessageBus,
    D: DeadLetterSink,
{
    async fn create(&self, command: CreateOrder) -> Result<Order> {
        let (order_id, user_id) = (command.order_id, command.user_id);
        let result = self.service.create_order(command).await.map_err(|e| {
            let error = SagaError::from(e);
            if !matches!(error, SagaError::Validation(_)) {
                tracing::error!(error = %error, "failed to store order");
            }
            error
        })?;

        self.user_orders.record(user_id, order_id).await;
        tracing::info!(
            %order_id,
            %user_id,
            total_amount = %result.aggregate.total_amount(),
            "order created"
        );
        metrics::counter!("orders_created_total").increment(1);

        self.schedule_publish(&result);
        Ok(result.aggregate)
    }

    async fn payment_succeeded(&self, command: MarkPaid) -> Result<PaymentOutcome> {
        let order_id = command.order_id;
        let result = self.service.mark_paid(command).await.map_err(|e| {
            let error = SagaError::from(e);
            tracing::error!(%order_id, error = %error, "failed to store payment");
            error
        })?;

        if result.is_noop() {
            return Ok(self.ignored(order_id, &result.aggregate, "payment.succeeded"));
        }

        tracing::info!(%order_id, version = %result.new_version, "order paid");
        metrics::counter!("orders_paid_total").increment(1);
        Ok(PaymentOutcome::Applied {
            status: result.aggregate.status(),
        })
    }

    async fn payment_failed(&self, command: CancelOrder) -> Result<PaymentOutcome> {
        let order_id = command.order_id;
        let result = self.service.cancel_order(command).await.map_err(|e| {
            let error = SagaError::from(e);
            tracing::error!(%order_id, error = %error, "failed to store cancellation");
            error
        })?;

        if result.is_noop() {
            return Ok(self.ignored(order_id, &result.aggregate, "payment.failed"));
        }

        tracing::info!(
            %order_id,
            version = %result.new_version,
            reason = result.aggregate.cancellation_reason().unwrap_or_default(),
            "order cancelled"
        );
        metrics::counter!("orders_cancelled_total").increment(1);

        self.schedule_publish(&result);
        Ok(PaymentOutcome::Applied {
            status: result.aggregate.status(),
        })
    }

    fn ignored(&self, order_id: AggregateId, order: &Order, event: &str) -> PaymentOutcome {
        let anomaly = match order.status() {
            OrderStatus::Unknown => Anomaly::UnknownOrder,
            status => Anomaly::AlreadyTerminal { status },
        };
        tracing::warn!(%order_id, event, anomaly = %anomaly, "payment event ignored");
        metrics::counter!("saga_anomalies_total").increment(1);
        PaymentOutcome::Ignored(anomaly)
    }

    /// The events are already durable; a failure here only delays delivery
    /// until the next relay catch-up.
    fn schedule_publish(&self, result: &CommandResult<Order>) {
        let records = match OutboxRecord::for_order(
            Some(result.aggregate.total_amount()),
            &result.envelopes,
        ) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "failed to derive outbox records");
                return;
            }
        };
        if let Err(e) = self.publisher.enqueue(records) {
            tracing::error!(error = %e, "failed to queue outbox records");
        }
    }
}

#[async_trait]
impl<S, B, D> MailboxHandler<AggregateId, OrderCommand> for OrderWorker<S, B, D>
where
    S: EventStore + 'static,
    B: MessageBus,
    D: DeadLetterSink,
{
    async fn handle(&self, _order_id: &AggregateId, command: OrderCommand) {
        // A dropped receiver means the caller went away; the work is done anyway.
        match command {
            OrderCommand::Create { command, reply } => {
                let _ = reply.send(self.create(command).await);
            }
            OrderCommand::PaymentSucceeded { command, reply } => {
                let _ = reply.send(self.payment_succeeded(command).await);
            }
            OrderCommand::PaymentFailed { command, reply } => {
                let _ = reply.send(self.payment_failed(command).await);
            }
        }
    }
}

/// Drives orders through `pending` to `paid` or `cancelled`.
pub struct SagaController<S: EventStore, B, D> {
    mailboxes: Mailboxes<AggregateId, OrderCommand, OrderWorker<S, B, D>>,
}

impl<S: EventStore, B, D> Clone for SagaController<S, B, D> {
    fn clone(&self) -> Self {
        Self {
            mailboxes: self.mailboxes.clone(),
        }
    }
}

impl<S, B, D> SagaController<S, B, D>
where
    S: EventStore + 'static,
    B: MessageBus,
    D: DeadLetterSink,
{
    pub fn new(store: S, publisher: OutboxPublisher<B, D>) -> Self {
        Self {
            mailboxes: Mailboxes::new(OrderWorker {
                service: OrderService::new(store),
                publisher,
                user_orders: UserOrdersIndex::new(),
            }),
        }
    }

    pub fn publisher(&self) -> &OutboxPublisher<B, D> {
        &self.mailboxes.handler().publisher
    }

    /// Validates and stores a new pending order.
    ///
    /// Returns once the Created event is durable; publication of
    /// `order.created` happens afterwards.
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn create_order(&self, user_id: UserId, items: Vec<OrderItem>) -> Result<Order> {
        let command = CreateOrder::new(user_id, items);
        let order_id = command.order_id;
        self.request(order_id, |reply| OrderCommand::Create { command, reply })
            .await
    }

    /// Marks a pending order paid. Repeats and unknown orders are ignored.
    pub async fn payment_succeeded(&self, command: MarkPaid) -> Result<PaymentOutcome> {
        let order_id = command.order_id;
        self.request(order_id, |reply| OrderCommand::PaymentSucceeded { command, reply })
            .await
    }

    /// Compensates a failed payment by cancelling a pending order.
    /// Repeats and unknown orders are ignored.
    pub async fn payment_failed(&self, command: CancelOrder) -> Result<PaymentOutcome> {
        let order_id = command.order_id;
        self.request(order_id, |reply| OrderCommand::PaymentFailed { command, reply })
            .await
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>> {
        Ok(self.mailboxes.handler().service.get_order(order_id).await?)
    }

    /// Every event stored for the order, oldest first.
    pub async fn order_events(&self, order_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        Ok(self.mailboxes.handler().service.order_events(order_id).await?)
    }

    pub fn user_orders(&self) -> &UserOrdersIndex {
        &self.mailboxes.handler().user_orders
    }

    /// Indexes every order already in the log by its user. Run at startup,
    /// before traffic is served.
    pub async fn rebuild_user_orders(&self) -> Result<usize> {
        let worker = self.mailboxes.handler();
        worker.user_orders.rebuild(worker.service.handler().store()).await
    }

    /// The user's orders, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut orders = Vec::new();
        for order_id in self.user_orders().orders_for(user_id).await {
            if let Some(order) = self.get_order(order_id).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    /// Stops accepting commands and waits for in-flight ones.
    pub async fn shutdown(&self) {
        self.mailboxes.shutdown().await;
    }

    async fn request<T>(
        &self,
        order_id: AggregateId,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> OrderCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.mailboxes
            .send(order_id, command(reply))
            .map_err(|_| SagaError::Unavailable)?;
        response.await.map_err(|_| SagaError::Unavailable)?
    }
}
