use escore_store::event_store::EventStoreError;

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("no projection registered under '{0}'")]
    NotFound(String),

    #[error("a projection is already registered under '{0}'")]
    AlreadyRegistered(String),

    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("projection handler failed during rebuild: {0}")]
    HandlerFailure(String),
}
