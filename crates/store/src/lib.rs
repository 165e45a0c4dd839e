//! Storage and transport adapters for the event-sourcing core: the
//! append-only event store, the outbox that bridges an append to
//! publication, and durable event bus backends.

pub mod bus;
pub mod event_store;
pub mod outbox;
