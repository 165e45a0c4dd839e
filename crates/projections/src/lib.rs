//! Projection registration, checkpointing, and lifecycle control.
//!
//! Grounded on `infra::projections::cursor_store` (checkpoint persistence)
//! and `infra::workers::projection_worker` (the per-projection poll-loop
//! thread), generalized from a per-tenant event-bus subscription to a
//! durable cursor over `EventStore::stream_all`.

mod checkpoint;
mod error;
mod manager;
mod projection;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use error::ProjectionError;
pub use manager::{ProjectionManager, ProjectionManagerConfig};
pub use projection::{Projection, ProjectionHandlerError, ProjectionState, ProjectionStatus};
