//! Domain layer for the order saga.
//!
//! - [`Aggregate`] / [`DomainEvent`]: event-sourced entities as pure folds
//! - [`CommandHandler`]: load by replay, decide, append at the next version
//! - [`Order`]: the order lifecycle (`pending` to `paid` or `cancelled`)

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    CAUSED_BY, CancelOrder, CreateOrder, MarkPaid, Money, Order, OrderError, OrderEvent,
    OrderItem, OrderService, OrderStatus, ProductId, UserId, ValidationIssue, order_total,
};
