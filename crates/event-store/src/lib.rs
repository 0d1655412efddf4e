//! Append-only event log for order aggregates.
//!
//! Events are stored per aggregate with a strictly increasing, gap-free
//! sequence number ([`Version`]). Two implementations are provided: an
//! in-memory log for tests and single-process runs, and a PostgreSQL log.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
