//! Order status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order, derived from its events.
///
/// ```text
/// Unknown ──Created──► Pending ──Paid──────► Paid
///                         │
///                         └────Cancelled──► Cancelled
/// ```
///
/// `Paid` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// No Created event has been applied.
    #[default]
    Unknown,
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Unknown => "unknown",
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
