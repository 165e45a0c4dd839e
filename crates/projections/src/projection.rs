use chrono::{DateTime, Utc};
use escore_store::event_store::StoredEvent;
use uuid::Uuid;

/// A read-model consumer: declares which event types it wants, applies
/// them one at a time, and optionally knows how to rebuild itself from a
/// full history rather than replaying `handle` one event at a time.
///
/// Grounded on `events::projection::Projection`, generalized from "a
/// single typed event enum" to "the raw `StoredEvent` record", since the
/// manager consumes many aggregate types through one `EventStore::stream_all`
/// cursor rather than one per-aggregate subscription.
pub trait Projection: Send + Sync {
    /// Stable identifier, used as the checkpoint key.
    fn name(&self) -> &str;

    /// Event types this projection cares about. The manager still hands it
    /// every event in cursor order; the filter is the projection's own
    /// responsibility inside `handle`, matching how `stream_all` interleaves
    /// every aggregate type on one global cursor.
    fn handled_event_types(&self) -> &[&str];

    /// Applies one event. Must be idempotent against `event.event_id`:
    /// at-least-once delivery means the same event may be handed to this
    /// method more than once after a crash and resume.
    fn handle(&self, event: &StoredEvent) -> Result<(), ProjectionHandlerError>;

    /// Rebuilds from a full ordered history. The default folds `handle`
    /// over every event; projections with a cheaper bulk path (e.g. one
    /// transaction instead of N) override it.
    fn rebuild(&self, events: &[StoredEvent]) -> Result<(), ProjectionHandlerError> {
        for event in events {
            self.handle(event)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("projection handler failed: {0}")]
pub struct ProjectionHandlerError(pub String);

impl ProjectionHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Lifecycle state of a registered projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionState {
    Running,
    Paused,
    Error,
    #[default]
    Stopped,
}

/// A point-in-time snapshot of a projection's health, returned by
/// `ProjectionManager::status`.
#[derive(Debug, Clone)]
pub struct ProjectionStatus {
    pub name: String,
    pub state: ProjectionState,
    pub processed_count: u64,
    pub failed_count: u64,
    pub last_event_id: Option<Uuid>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
