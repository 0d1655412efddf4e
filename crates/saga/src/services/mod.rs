//! Collaborators on the payment side of the saga.

pub mod payment;
pub mod processor;

pub use payment::{
    InMemoryPaymentStatusClient, PaymentClientError, PaymentRecord, PaymentStatus,
    PaymentStatusClient,
};
pub use processor::SimulatedPaymentProcessor;
