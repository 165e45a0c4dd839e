/// Error vocabulary surfaced by the command bus and its handlers.
///
/// The bus is transparent to handler-originated errors: `Handler` wraps
/// whatever a registered handler returned, unchanged in meaning.
/// Normalization to application-level error codes happens outside the
/// core, at the host's outer boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// `command.type` has no registered handler.
    #[error("no handler registered for command type '{0}'")]
    HandlerNotFound(String),

    /// The command failed shape/identity validation before reaching a
    /// handler (e.g. a middleware rejected it).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A middleware short-circuited the pipeline.
    #[error("middleware rejected command: {0}")]
    MiddlewareRejected(String),

    /// The targeted aggregate does not exist.
    #[error("aggregate not found")]
    AggregateNotFound,

    /// Optimistic concurrency conflict surfaced by the event store.
    #[error("concurrency conflict: expected version {expected:?}, actual {actual}")]
    ConcurrencyConflict { expected: String, actual: u64 },

    /// The handler rejected the command for a domain reason.
    #[error("handler error: {0}")]
    Handler(String),

    /// The dispatch deadline elapsed before completion.
    #[error("dispatch timed out")]
    Timeout,

    /// The dispatch was cancelled before completion.
    #[error("dispatch cancelled")]
    Cancelled,
}
