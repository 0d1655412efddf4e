//! Order aggregate implementation.

use common::AggregateId;
use event_store::Version;
use serde::Serialize;

use crate::aggregate::Aggregate;

use super::{
    Money, OrderError, OrderEvent, OrderItem, OrderStatus, UserId, ValidationIssue,
    events::{OrderCancelledData, OrderCreatedData, OrderPaidData},
    value_objects::order_total,
};

/// Order state folded from its events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Option<AggregateId>,
    user_id: Option<UserId>,
    items: Vec<OrderItem>,
    total_amount: Money,
    status: OrderStatus,
    version: Version,
    transaction_id: Option<String>,
    cancellation_reason: Option<String>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::Created(data) => self.apply_created(data),
            OrderEvent::Paid(data) => self.apply_paid(data),
            OrderEvent::Cancelled(data) => self.apply_cancelled(data),
        }
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Command methods (return events)
impl Order {
    /// Validates the items and produces the Created event.
    ///
    /// Every problem is reported, not just the first.
    pub fn create(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        items: Vec<OrderItem>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.status != OrderStatus::Unknown {
            return Err(OrderError::AlreadyCreated);
        }

        let issues = validate_items(&items);
        if !issues.is_empty() {
            return Err(OrderError::Validation(issues));
        }

        let Some(total) = order_total(&items) else {
            return Err(OrderError::Validation(vec![ValidationIssue::new(
                "items",
                format!("Order total must not exceed {}", Money::MAX),
            )]));
        };
        Ok(vec![OrderEvent::created(order_id, user_id, items, total)])
    }

    /// Produces a Paid event if the order is pending; otherwise nothing.
    pub fn pay(&self, transaction_id: Option<String>) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_pay() {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::paid(transaction_id)])
    }

    /// Produces a Cancelled event if the order is pending; otherwise nothing.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_cancel() {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::cancelled(reason)])
    }
}

fn validate_items(items: &[OrderItem]) -> Vec<ValidationIssue> {
    if items.is_empty() {
        return vec![ValidationIssue::new(
            "items",
            "Items must be a non-empty array",
        )];
    }

    let mut issues = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if item.quantity == 0 {
            issues.push(ValidationIssue::new(
                format!("items[{index}].quantity"),
                "Quantity must be at least 1",
            ));
        }
        if !item.price.is_finite() || item.price <= 0.0 {
            issues.push(ValidationIssue::new(
                format!("items[{index}].price"),
                "Price must be a positive number",
            ));
        }
    }
    issues
}

// Apply event helpers. Events that do not fit the current status are
// ignored so replay never fails.
impl Order {
    fn apply_created(&mut self, data: OrderCreatedData) {
        if self.status != OrderStatus::Unknown {
            return;
        }
        self.id = Some(data.order_id);
        self.user_id = Some(data.user_id);
        self.items = data.items;
        self.total_amount = data.total_amount;
        self.status = OrderStatus::Pending;
    }

    fn apply_paid(&mut self, data: OrderPaidData) {
        if !self.status.can_pay() {
            return;
        }
        self.status = OrderStatus::Paid;
        self.transaction_id = data.transaction_id;
    }

    fn apply_cancelled(&mut self, data: OrderCancelledData) {
        if !self.status.can_cancel() {
            return;
        }
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(data.reason);
    }
}
