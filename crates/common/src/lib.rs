//! Shared types for the order saga workspace.
//!
//! - [`AggregateId`]: typed identifier for event-sourced aggregates
//! - [`Mailboxes`]: per-key serialized work queues used to keep a single
//!   writer per aggregate

pub mod mailbox;
pub mod types;

pub use mailbox::{MailboxClosed, MailboxHandler, Mailboxes};
pub use types::AggregateId;
