use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Projections are pure event consumers; persistence of the read model
/// itself lives outside this crate, in whatever store backs it.
pub trait Projection {
    type Ev: Event;

    /// Applies a single event to the projection.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
