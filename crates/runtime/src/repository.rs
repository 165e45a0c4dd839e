use std::sync::Arc;

use escore_core::{Aggregate, AggregateId, Clock, ExpectedVersion};
use escore_events::{Event, Metadata};
use escore_store::event_store::{EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::snapshot_policy::{NeverSnapshot, SnapshotPolicy};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("concurrency conflict: expected {expected:?}, actual {actual}")]
    Concurrency { expected: ExpectedVersion, actual: u64 },

    #[error("failed to decode stored event payload: {0}")]
    Decode(String),

    #[error("failed to encode aggregate state for snapshotting: {0}")]
    EncodeSnapshot(String),

    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),
}

/// Loads and persists aggregates against an `EventStore`, applying snapshot
/// acceleration transparently. One instance is scoped to a single aggregate
/// type (e.g. `"account"`); the same `EventStore` can back repositories for
/// several aggregate types.
pub struct AggregateRepository<S> {
    store: S,
    aggregate_type: String,
    snapshot_policy: Arc<dyn SnapshotPolicy>,
    clock: Arc<dyn Clock>,
}

impl<S> AggregateRepository<S>
where
    S: EventStore,
{
    pub fn new(store: S, aggregate_type: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            aggregate_type: aggregate_type.into(),
            snapshot_policy: Arc::new(NeverSnapshot),
            clock,
        }
    }

    pub fn with_snapshot_policy(mut self, policy: Arc<dyn SnapshotPolicy>) -> Self {
        self.snapshot_policy = policy;
        self
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn exists(&self, aggregate_id: AggregateId) -> Result<bool, RepositoryError> {
        Ok(self.store.has_aggregate(aggregate_id, &self.aggregate_type)?)
    }

    pub fn version(&self, aggregate_id: AggregateId) -> Result<u64, RepositoryError> {
        Ok(self.store.current_version(aggregate_id, &self.aggregate_type)?)
    }

    pub fn event_history(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, RepositoryError> {
        Ok(self.store.load(aggregate_id, &self.aggregate_type)?)
    }

    pub fn event_history_after(
        &self,
        aggregate_id: AggregateId,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        Ok(self.store.load_after(aggregate_id, &self.aggregate_type, after_version)?)
    }

    /// Rehydrates an aggregate from its latest snapshot (if any) plus every
    /// event committed since, folded in via `load_from_history`. An
    /// aggregate with no snapshot and no events does not exist, so this
    /// reports `EventStoreError::AggregateNotFound` rather than handing back
    /// a freshly-defaulted, version-zero instance.
    #[instrument(skip(self), fields(aggregate_type = %self.aggregate_type, aggregate_id = %aggregate_id))]
    pub fn load<A>(&self, aggregate_id: AggregateId) -> Result<A, RepositoryError>
    where
        A: Aggregate + Default + DeserializeOwned,
        A::Event: Event + DeserializeOwned,
    {
        let snapshot = self.store.load_latest_snapshot(aggregate_id, &self.aggregate_type)?;

        let (mut aggregate, snapshot_version) = match snapshot {
            Some(snapshot) => {
                let aggregate: A =
                    serde_json::from_value(snapshot.state).map_err(|e| RepositoryError::Decode(e.to_string()))?;
                (aggregate, snapshot.version)
            }
            None => (A::default(), 0),
        };

        let stored = self.store.load_after(aggregate_id, &self.aggregate_type, snapshot_version)?;

        if snapshot_version == 0 && stored.is_empty() {
            return Err(RepositoryError::Store(EventStoreError::AggregateNotFound));
        }

        let events = stored
            .iter()
            .map(|event| {
                serde_json::from_value::<A::Event>(event.payload.clone())
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        aggregate.load_from_history(&events);

        Ok(aggregate)
    }

    /// Drains `aggregate`'s uncommitted-event buffer and appends it to its
    /// stream, guarded by the version the buffer implies
    /// (`aggregate.version() - uncommitted_events().len()`), then snapshots
    /// the resulting state if the policy says to. An empty buffer is a
    /// no-op. On success the buffer is cleared via `mark_committed`; on
    /// failure `aggregate` is left untouched so the caller can retry or
    /// discard it. A snapshot write failure is logged, not propagated:
    /// losing a snapshot only costs a slower future replay, never
    /// correctness.
    #[instrument(skip(self, aggregate, metadata), fields(aggregate_type = %self.aggregate_type, aggregate_id = %aggregate_id))]
    pub fn save<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate: &mut A,
        metadata: Metadata,
    ) -> Result<Vec<StoredEvent>, RepositoryError>
    where
        A: Serialize,
        A::Event: Serialize,
        A: Aggregate,
    {
        let uncommitted_len = aggregate.uncommitted_events().len() as u64;
        if uncommitted_len == 0 {
            return Ok(vec![]);
        }

        let expected_version = ExpectedVersion::Exact(aggregate.version() - uncommitted_len);

        let uncommitted = aggregate
            .uncommitted_events()
            .iter()
            .map(|e| UncommittedEvent::from_typed(e, metadata.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        let committed = self
            .store
            .append(aggregate_id, &self.aggregate_type, expected_version, uncommitted)
            .map_err(|e| match e {
                EventStoreError::ConcurrencyConflict { expected, actual } => {
                    RepositoryError::Concurrency { expected, actual }
                }
                other => RepositoryError::Store(other),
            })?;

        aggregate.mark_committed();

        if let (Some(first), Some(last)) = (committed.first(), committed.last()) {
            let version_before = first.version.saturating_sub(1);
            let version_after = last.version;
            if self.snapshot_policy.should_snapshot(version_before, version_after) {
                match serde_json::to_value(&*aggregate) {
                    Ok(state) => {
                        let snapshot = Snapshot {
                            aggregate_id,
                            aggregate_type: self.aggregate_type.clone(),
                            version: version_after,
                            captured_at: self.clock.now(),
                            state,
                        };
                        if let Err(e) = self.store.save_snapshot(snapshot) {
                            warn!(error = %e, "snapshot write failed, continuing without it");
                        }
                    }
                    Err(e) => warn!(error = %e, "snapshot encode failed, continuing without it"),
                }
            }
        }

        Ok(committed)
    }
}
