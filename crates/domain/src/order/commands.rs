//! Order commands.

use common::AggregateId;

use crate::command::Command;

use super::{Order, OrderItem, UserId};

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
}

impl CreateOrder {
    /// Creates the command with a freshly generated order id.
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Self {
        Self {
            order_id: AggregateId::new(),
            user_id,
            items,
        }
    }
}

impl Command for CreateOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Records a successful payment.
#[derive(Debug, Clone)]
pub struct MarkPaid {
    pub order_id: AggregateId,
    pub transaction_id: Option<String>,
    /// Routing key or message id of the inbound message, if any.
    pub caused_by: Option<String>,
}

impl MarkPaid {
    pub fn new(order_id: AggregateId) -> Self {
        Self {
            order_id,
            transaction_id: None,
            caused_by: None,
        }
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.caused_by = Some(cause.into());
        self
    }
}

impl Command for MarkPaid {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Cancels a pending order. Used as the compensating step when payment
/// fails.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub reason: String,
    pub caused_by: Option<String>,
}

impl CancelOrder {
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
            caused_by: None,
        }
    }

    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.caused_by = Some(cause.into());
        self
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
