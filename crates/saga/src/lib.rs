//! Order saga orchestration.
//!
//! An order is created `pending`, then moves to `paid` or, as the
//! compensating step for a failed payment, to `cancelled`. Payment results
//! arrive asynchronously and may be duplicated or late.
//!
//! - [`SagaController`]: single writer per order, idempotent transitions
//! - [`InboundDispatcher`]: turns payment messages into transitions and
//!   settles them only after the resulting event is stored
//! - [`PaymentStatusProber`]: live payment status behind a [`CircuitBreaker`]
//! - [`UserOrdersIndex`]: which orders each user placed

pub mod circuit_breaker;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod prober;
pub mod services;
pub mod user_orders;

pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker, Permit};
pub use controller::{Anomaly, PaymentOutcome, SagaController};
pub use dispatcher::{Acknowledgement, Delivery, InboundDispatcher};
pub use error::{Result, SagaError};
pub use inbound::{InboundError, PaymentEvent, PaymentMessage, PAYMENT_FAILED, PAYMENT_SUCCEEDED};
pub use prober::{PaymentStatusProber, PaymentStatusReport};
pub use services::{
    InMemoryPaymentStatusClient, PaymentClientError, PaymentRecord, PaymentStatus,
    PaymentStatusClient, SimulatedPaymentProcessor,
};
pub use user_orders::UserOrdersIndex;
