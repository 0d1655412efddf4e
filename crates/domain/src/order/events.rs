//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Money, OrderItem, UserId};

/// Everything that can happen to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created(OrderCreatedData),
    Paid(OrderPaidData),
    Cancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "Created",
            OrderEvent::Paid(_) => "Paid",
            OrderEvent::Cancelled(_) => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    /// Rounded once at creation; never recomputed by the fold.
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaidData {
    /// Reference from the payment subsystem, when it sent one.
    pub transaction_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn created(
        order_id: AggregateId,
        user_id: UserId,
        items: Vec<OrderItem>,
        total_amount: Money,
    ) -> Self {
        OrderEvent::Created(OrderCreatedData {
            order_id,
            user_id,
            items,
            total_amount,
            created_at: Utc::now(),
        })
    }

    pub fn paid(transaction_id: Option<String>) -> Self {
        OrderEvent::Paid(OrderPaidData {
            transaction_id,
            paid_at: Utc::now(),
        })
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        OrderEvent::Cancelled(OrderCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }
}
