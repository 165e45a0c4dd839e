//! Aggregate root trait for event-sourced domain models.

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules can decide how they model
/// state transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For event-sourced aggregates this is the number of events applied so
    /// far, which is also the stream's current sequence number.
    fn version(&self) -> u64;
}

/// An event-sourced aggregate: a decision function (`handle`) plus a state
/// transition function (`apply`), plus the uncommitted-event buffer the
/// repository drains on save.
///
/// `handle` is a pure decision: given the aggregate's current state and a
/// command, it returns the events that should result, or rejects the
/// command with a domain error. It never mutates `self`. `apply` is the
/// corresponding state transition: given an event, it folds it into the
/// aggregate's state and is expected to be infallible (an event is a fact
/// that already happened).
///
/// Rehydration is `load_from_history`, which folds `apply` without
/// recording anything uncommitted. Handling a command is `let events =
/// aggregate.handle(&cmd)?; for e in events { aggregate.apply_and_record(e);
/// }` — each resulting event is both applied and buffered, so the
/// repository can later read `uncommitted_events()` to know what to
/// persist and `mark_committed()` to clear the buffer once it has.
pub trait Aggregate: AggregateRoot + Sized {
    /// The command type this aggregate accepts.
    type Command;
    /// The event type this aggregate emits and applies.
    type Event;
    /// The error returned when a command is rejected.
    type Error;

    /// Applies a previously-decided (or rehydrated) event to `self`.
    fn apply(&mut self, event: &Self::Event);

    /// Decides what events, if any, should result from `command`.
    ///
    /// Implementations validate the command against the aggregate's current
    /// state and return `Err` without emitting anything if it violates a
    /// domain invariant.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Applies `event` and appends it to the uncommitted-event buffer,
    /// advancing the aggregate's tentative version as a side effect of
    /// `apply`. Implementations back this with a private `Vec<Self::Event>`
    /// field.
    fn apply_and_record(&mut self, event: Self::Event);

    /// The uncommitted-event buffer, in recording order.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears the uncommitted-event buffer. Called by the repository after
    /// a successful save; never called directly by domain code.
    fn mark_committed(&mut self);

    /// Folds `apply` over `events` without recording them as uncommitted.
    /// Used to rebuild state from history on load; the default
    /// implementation is correct for every aggregate and rarely needs
    /// overriding.
    fn load_from_history(&mut self, events: &[Self::Event]) {
        for event in events {
            self.apply(event);
        }
    }
}
