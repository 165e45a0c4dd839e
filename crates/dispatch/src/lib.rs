//! Command bus, middleware pipeline, and message transports.
//!
//! Grounded on `infra::command_dispatcher` (the load/decide/persist/publish
//! pipeline, generalized from one dispatcher per aggregate type into a
//! registry keyed by command type) and `infra::workers::projection_worker`
//! (the thread-pool transport).

mod command_bus;
mod envelope;
mod error;
mod middleware;
mod transport;

pub use command_bus::{CommandBus, CommandHandler};
pub use envelope::CommandEnvelope;
pub use error::DispatchError;
pub use middleware::{Middleware, Next, Pipeline};
pub use transport::{Handler, HandlerResult, InMemoryQueuedTransport, SyncTransport, Transport};
