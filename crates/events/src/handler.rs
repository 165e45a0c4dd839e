use crate::{Command, Event};

/// Handles a command and emits events, independent of the full aggregate
/// lifecycle (no version tracking, no state).
///
/// Useful for workers and tests that want command-to-events transformation
/// without pulling in the aggregate runtime.
pub trait CommandHandler {
    type Cmd: Command;
    type Ev: Event;
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn handle(&self, command: Self::Cmd) -> Result<Vec<Self::Ev>, Self::Error>;
}

/// Executes a command against an aggregate in place: decide, then evolve.
///
/// This is the pure core of the event-sourced lifecycle, with no store and
/// no bus involved. Each resulting event is applied and recorded via
/// `apply_and_record`, leaving it in the aggregate's uncommitted-event
/// buffer exactly as if a repository-backed save were about to follow.
/// `AggregateRepository` (in the runtime crate) wraps this same
/// decide-then-evolve step with loading, persistence, and publication.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: escore_core::Aggregate,
    A::Event: Clone,
{
    let events = A::handle(aggregate, command)?;
    for ev in events.iter().cloned() {
        A::apply_and_record(aggregate, ev);
    }
    Ok(events)
}
