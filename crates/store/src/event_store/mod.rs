//! Append-only event storage: the write side of the framework.

#[allow(clippy::module_inception)]
mod r#trait;
mod in_memory;

#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{Cursor, EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};

#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
