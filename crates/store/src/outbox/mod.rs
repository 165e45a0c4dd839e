//! At-least-once event publication: an outbox row is written atomically
//! with the event append, and a background dispatcher drains it with
//! retries and exponential backoff.

mod dispatcher;
mod store;
mod types;

pub use dispatcher::{spawn, DispatcherStats, OutboxDispatcherConfig, OutboxDispatcherHandle};
pub use store::{InMemoryOutboxStore, OutboxError, OutboxEventStore, OutboxStore};
pub use types::{BackoffStrategy, OutboxEntry, OutboxStatus, RetryPolicy};
