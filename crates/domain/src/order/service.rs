//! Order service providing a simplified API for order operations.

use std::collections::HashMap;

use common::AggregateId;
use event_store::{EventEnvelope, EventStore};

use crate::command::{Command, CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{CancelOrder, CreateOrder, MarkPaid, Order};

/// Metadata key recording what triggered an event.
pub const CAUSED_BY: &str = "caused_by";

fn causation(caused_by: Option<&str>) -> HashMap<String, serde_json::Value> {
    caused_by
        .map(|cause| HashMap::from([(CAUSED_BY.to_string(), serde_json::json!(cause))]))
        .unwrap_or_default()
}

/// Order commands and queries over an event store.
///
/// Commands are not serialized here; callers that may race on one order
/// must funnel them through a single writer, with the store's version check
/// as the backstop.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, user_id = %cmd.user_id))]
    pub async fn create_order(
        &self,
        cmd: CreateOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CreateOrder {
            order_id,
            user_id,
            items,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.create(order_id, user_id, items))
            .await
    }

    /// Appends Paid if the order is pending. A no-op result otherwise.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.aggregate_id()))]
    pub async fn mark_paid(&self, cmd: MarkPaid) -> Result<CommandResult<Order>, DomainError> {
        let metadata = causation(cmd.caused_by.as_deref());
        let transaction_id = cmd.transaction_id;

        self.handler
            .execute_with_metadata(cmd.order_id, metadata, |order| order.pay(transaction_id))
            .await
    }

    /// Appends Cancelled if the order is pending. A no-op result otherwise.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.aggregate_id()))]
    pub async fn cancel_order(
        &self,
        cmd: CancelOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let metadata = causation(cmd.caused_by.as_deref());
        let reason = cmd.reason;

        self.handler
            .execute_with_metadata(cmd.order_id, metadata, |order| order.cancel(reason))
            .await
    }

    /// Current state of an order, or `None` if it was never created.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// The order's full audit trail, oldest first.
    pub async fn order_events(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        self.handler.history(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Money, OrderItem, OrderStatus, UserId};
    use event_store::{InMemoryEventStore, Version};

    fn scenario_order() -> CreateOrder {
        CreateOrder::new(UserId::new(1), vec![OrderItem::new(1, 2, 10.00)])
    }

    #[tokio::test]
    async fn create_order() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = scenario_order();
        let order_id = cmd.order_id;

        let result = service.create_order(cmd).await.unwrap();

        assert_eq!(result.new_version, Version::first());
        assert_eq!(result.aggregate.status(), OrderStatus::Pending);
        assert_eq!(result.aggregate.total_amount(), Money::from_cents(2000));

        let loaded = service.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(loaded, result.aggregate);
    }

    #[tokio::test]
    async fn mark_paid_records_cause() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = scenario_order();
        let order_id = cmd.order_id;
        service.create_order(cmd).await.unwrap();

        let result = service
            .mark_paid(
                MarkPaid::new(order_id)
                    .with_transaction("tx-1")
                    .caused_by("payment.succeeded"),
            )
            .await
            .unwrap();

        assert_eq!(result.aggregate.status(), OrderStatus::Paid);
        assert_eq!(
            result.envelopes[0].metadata_str(CAUSED_BY),
            Some("payment.succeeded")
        );
    }

    #[tokio::test]
    async fn duplicate_payment_is_noop() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = scenario_order();
        let order_id = cmd.order_id;
        service.create_order(cmd).await.unwrap();

        service.mark_paid(MarkPaid::new(order_id)).await.unwrap();
        let second = service.mark_paid(MarkPaid::new(order_id)).await.unwrap();

        assert!(second.is_noop());
        assert_eq!(service.order_events(order_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancel_order() {
        let service = OrderService::new(InMemoryEventStore::new());
        let cmd = scenario_order();
        let order_id = cmd.order_id;
        service.create_order(cmd).await.unwrap();

        let result = service
            .cancel_order(CancelOrder::new(order_id, "payment failed"))
            .await
            .unwrap();

        assert_eq!(result.aggregate.status(), OrderStatus::Cancelled);
        assert_eq!(result.aggregate.total_amount(), Money::from_cents(2000));
    }

    #[tokio::test]
    async fn get_order_missing() {
        let service = OrderService::new(InMemoryEventStore::new());
        assert!(service.get_order(AggregateId::new()).await.unwrap().is_none());
    }
}
