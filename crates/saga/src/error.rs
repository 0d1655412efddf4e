//! Saga error types.

use domain::{DomainError, OrderError, ValidationIssue};
use event_store::EventStoreError;
use thiserror::Error;

/// Errors surfaced by the saga controller.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The command was malformed. Nothing was stored.
    #[error("Validation failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<ValidationIssue>),

    /// The append failed atomically. The caller may retry.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Another writer advanced the log first. Reload and retry.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    /// The controller has been shut down.
    #[error("Saga controller unavailable")]
    Unavailable,
}

impl SagaError {
    /// True when repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::ConcurrencyConflict(_))
    }
}

impl From<DomainError> for SagaError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Order(OrderError::Validation(issues)) => Self::Validation(issues),
            DomainError::Order(e @ OrderError::AlreadyCreated) => {
                Self::ConcurrencyConflict(e.to_string())
            }
            DomainError::EventStore(e) if e.is_conflict() => Self::ConcurrencyConflict(e.to_string()),
            DomainError::EventStore(e) => Self::Persistence(e.to_string()),
            DomainError::AggregateNotFound { aggregate_id, .. } => Self::NotFound(aggregate_id),
        }
    }
}

impl From<EventStoreError> for SagaError {
    fn from(error: EventStoreError) -> Self {
        DomainError::from(error).into()
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
