//! Wire-level vocabulary shared by the store, dispatch, projection, and saga
//! crates: commands, events, the envelope they travel in once committed,
//! the publish/subscribe bus contract, and the pure projection runner.
//!
//! This crate performs no IO. It defines the shapes infrastructure crates
//! move around and the pure functions (`execute`, `ProjectionRunner::apply`)
//! that don't need a store or a thread to be correct.

mod bus;
mod command;
mod envelope;
mod event;
mod handler;
mod in_memory_bus;
mod projection;
mod runner;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::{EventEnvelope, Metadata};
pub use event::Event;
pub use handler::{execute, CommandHandler};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
pub use runner::{ProjectionCursor, ProjectionError, ProjectionRunner};
