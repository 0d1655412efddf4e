//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::{CancelOrder, CreateOrder, MarkPaid};
pub use events::{OrderCancelledData, OrderCreatedData, OrderEvent, OrderPaidData};
pub use service::{CAUSED_BY, OrderService};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem, ProductId, UserId, order_total};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location of the field, e.g. `items[0].quantity`.
    pub path: String,
    #[serde(rename = "msg")]
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid order: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Order already created")]
    AlreadyCreated,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
