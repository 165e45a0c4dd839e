use chrono::{DateTime, Utc};
use escore_core::{AggregateId, ExpectedVersion};
use escore_events::Metadata;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// An event not yet committed to a stream: everything the caller supplies,
/// before the store assigns it a stream position and a global sequence.
#[derive(Debug, Clone)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    /// Schema version of `payload`, distinct from the stream position the
    /// store assigns on commit.
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Builds an uncommitted event from a typed domain event, erasing the
    /// payload to JSON. Infrastructure works with `JsonValue` so the store
    /// never needs to know about any particular event enum.
    pub fn from_typed<E: escore_events::Event + serde::Serialize>(
        event: &E,
        metadata: Metadata,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            metadata,
            payload: serde_json::to_value(event)?,
        })
    }
}

/// An event record as persisted, matching the wire layout:
/// `(global_sequence, aggregate_id, aggregate_type, version, event_id,
/// event_type, timestamp, metadata, payload)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredEvent {
    /// Position in the store's global, cross-aggregate ordering. Used by
    /// `stream_all` cursors; never regresses.
    pub global_sequence: u64,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Position within this aggregate's stream, 1-based and dense.
    pub version: u64,
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub payload: JsonValue,
}

impl StoredEvent {
    /// Wraps this record in the typed envelope used by the rest of the
    /// framework, deserializing `payload` into `E`.
    pub fn to_envelope<E>(&self) -> Result<escore_events::EventEnvelope<E>, serde_json::Error>
    where
        E: serde::de::DeserializeOwned,
    {
        Ok(escore_events::EventEnvelope::new(
            self.event_id,
            self.event_type.clone(),
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.version,
            self.occurred_at,
            self.metadata.clone(),
            serde_json::from_value(self.payload.clone())?,
        ))
    }
}

/// A snapshot record: `(aggregate_id, aggregate_type, version, timestamp,
/// state)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: u64,
    pub captured_at: DateTime<Utc>,
    pub state: JsonValue,
}

/// An opaque, monotone position in the store's global event ordering.
/// `stream_all` accepts one as a resume point and returns one alongside
/// every event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub u64);

#[derive(Debug, Clone, thiserror::Error)]
pub enum EventStoreError {
    #[error("concurrency conflict: expected version {expected:?}, actual {actual}")]
    ConcurrencyConflict { expected: ExpectedVersion, actual: u64 },

    #[error("aggregate not found")]
    AggregateNotFound,

    #[error("aggregate type mismatch: stream is '{stream}', append used '{attempted}'")]
    AggregateTypeMismatch { stream: String, attempted: String },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

/// Append-only, per-aggregate event log with optimistic concurrency,
/// global streaming reads, and optional snapshot storage.
///
/// Implementations are synchronous: the command-dispatch contract in the
/// dispatch crate depends on handler errors being the immediate return
/// value, so nothing in the write path may suspend on an async runtime.
/// `PostgresEventStore` bridges to `sqlx` internally via
/// `tokio::runtime::Handle::block_on` rather than exposing `async fn`
/// here.
pub trait EventStore: Send + Sync {
    /// Atomically appends `events` to the `(aggregate_type, aggregate_id)`
    /// stream iff its current version equals `expected_version`. On
    /// success the events are assigned contiguous stream versions
    /// starting at `current + 1`.
    fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// All events for the stream, ordered by ascending version.
    fn load(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Events with version strictly greater than `after_version`.
    fn load_after(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// A batch of events in global cursor order, starting strictly after
    /// `from_cursor` (or from the beginning, if `None`). Used by
    /// projections that consume the whole store rather than a single
    /// subscription.
    fn stream_all(
        &self,
        from_cursor: Option<Cursor>,
        batch_size: usize,
    ) -> Result<Vec<(Cursor, StoredEvent)>, EventStoreError>;

    /// Whether the stream has at least one event. Default implementation
    /// delegates to `current_version`; implementations with a cheaper
    /// existence check may override it.
    fn has_aggregate(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<bool, EventStoreError> {
        Ok(self.current_version(aggregate_id, aggregate_type)? > 0)
    }

    /// The highest event version persisted for the stream, or 0 if it has
    /// no events.
    fn current_version(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<u64, EventStoreError> {
        Ok(self
            .load(aggregate_id, aggregate_type)?
            .last()
            .map(|e| e.version)
            .unwrap_or(0))
    }

    /// Persists a snapshot. Optional capability: the default is a no-op,
    /// which degrades replay performance but never correctness.
    fn save_snapshot(&self, _snapshot: Snapshot) -> Result<(), EventStoreError> {
        Ok(())
    }

    /// The latest snapshot at or below the stream's current version, if
    /// any. Optional capability: the default always reports none.
    fn load_latest_snapshot(
        &self,
        _aggregate_id: AggregateId,
        _aggregate_type: &str,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        Ok(None)
    }
}

impl<S> EventStore for std::sync::Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(aggregate_id, aggregate_type, expected_version, events)
    }

    fn load(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load(aggregate_id, aggregate_type)
    }

    fn load_after(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_after(aggregate_id, aggregate_type, after_version)
    }

    fn stream_all(
        &self,
        from_cursor: Option<Cursor>,
        batch_size: usize,
    ) -> Result<Vec<(Cursor, StoredEvent)>, EventStoreError> {
        (**self).stream_all(from_cursor, batch_size)
    }

    fn has_aggregate(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<bool, EventStoreError> {
        (**self).has_aggregate(aggregate_id, aggregate_type)
    }

    fn current_version(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<u64, EventStoreError> {
        (**self).current_version(aggregate_id, aggregate_type)
    }

    fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        (**self).save_snapshot(snapshot)
    }

    fn load_latest_snapshot(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        (**self).load_latest_snapshot(aggregate_id, aggregate_type)
    }
}
