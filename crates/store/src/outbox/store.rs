use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use escore_core::{AggregateId, Clock, ExpectedVersion};
use uuid::Uuid;

use super::types::{OutboxEntry, OutboxStatus};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Clone, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox storage failure: {0}")]
    StorageFailure(String),
    #[error("no such outbox entry: {0}")]
    NotFound(Uuid),
}

/// Durable queue of pending event publishes, claimed and drained by a
/// dispatcher. Claiming must be race-free: two dispatcher instances (or
/// two ticks of the same one) must never both believe they own the same
/// row.
pub trait OutboxStore: Send + Sync {
    fn enqueue(&self, entry: OutboxEntry) -> Result<(), OutboxError>;

    /// Claims up to `batch_size` pending rows whose `next_attempt_at <=
    /// now`, ordered by creation time, marking them in-flight so a
    /// concurrent claim can't also take them.
    fn claim_batch(&self, batch_size: usize, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>, OutboxError>;

    fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError>;

    /// Records a failed publish attempt. `next_attempt_at = None` means
    /// retries are exhausted; the row becomes `Failed` (terminal).
    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError>;

    /// Returns a claimed row to `Pending` without recording a failure.
    /// Used on graceful dispatcher shutdown.
    fn release_claim(&self, id: Uuid) -> Result<(), OutboxError>;

    /// Releases any claim held longer than `older_than`, for dispatchers
    /// resuming after a crash between claim and publish.
    fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError>;

    fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxError>;
}

impl<O> OutboxStore for Arc<O>
where
    O: OutboxStore + ?Sized,
{
    fn enqueue(&self, entry: OutboxEntry) -> Result<(), OutboxError> {
        (**self).enqueue(entry)
    }

    fn claim_batch(&self, batch_size: usize, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>, OutboxError> {
        (**self).claim_batch(batch_size, now)
    }

    fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        (**self).mark_published(id, at)
    }

    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        (**self).mark_failed(id, error, next_attempt_at)
    }

    fn release_claim(&self, id: Uuid) -> Result<(), OutboxError> {
        (**self).release_claim(id)
    }

    fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
        (**self).reclaim_stale(older_than)
    }

    fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxError> {
        (**self).list_by_status(status)
    }
}

#[derive(Debug, Default)]
struct InMemoryOutboxState {
    entries: HashMap<Uuid, OutboxEntry>,
    claimed_at: HashMap<Uuid, DateTime<Utc>>,
}

/// In-memory outbox store for tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    state: RwLock<InMemoryOutboxState>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryOutboxState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn enqueue(&self, entry: OutboxEntry) -> Result<(), OutboxError> {
        let mut state = self.lock();
        state.entries.insert(entry.id, entry);
        Ok(())
    }

    fn claim_batch(&self, batch_size: usize, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>, OutboxError> {
        let mut state = self.lock();

        let claimed: HashSet<Uuid> = state.claimed_at.keys().copied().collect();
        let mut candidates: Vec<Uuid> = state
            .entries
            .values()
            .filter(|e| {
                e.status == OutboxStatus::Pending
                    && e.next_attempt_at <= now
                    && !claimed.contains(&e.id)
            })
            .map(|e| e.id)
            .collect();

        candidates.sort_by_key(|id| state.entries[id].created_at);
        candidates.truncate(batch_size);

        let mut result = Vec::with_capacity(candidates.len());
        for id in candidates {
            state.claimed_at.insert(id, now);
            result.push(state.entries[&id].clone());
        }
        Ok(result)
    }

    fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut state = self.lock();
        state.claimed_at.remove(&id);
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(OutboxError::NotFound(id))?;
        entry.status = OutboxStatus::Published;
        entry.published_at = Some(at);
        Ok(())
    }

    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        let mut state = self.lock();
        state.claimed_at.remove(&id);
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(OutboxError::NotFound(id))?;
        entry.retry_count += 1;
        entry.last_error = Some(error);
        match next_attempt_at {
            Some(at) => {
                entry.status = OutboxStatus::Pending;
                entry.next_attempt_at = at;
            }
            None => entry.status = OutboxStatus::Failed,
        }
        Ok(())
    }

    fn release_claim(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut state = self.lock();
        state.claimed_at.remove(&id);
        Ok(())
    }

    fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
        let mut state = self.lock();
        let stale: Vec<Uuid> = state
            .claimed_at
            .iter()
            .filter(|(_, claimed_at)| **claimed_at <= older_than)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            state.claimed_at.remove(id);
        }
        Ok(stale.len())
    }

    fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxError> {
        let state = self.lock();
        Ok(state
            .entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }
}

/// Decorates an `EventStore` so every committed event also gets a pending
/// outbox row, written atomically alongside it. For the in-memory
/// reference store this is a best-effort sequential write, not a true
/// transaction; `PostgresEventStore` is expected to write both inside
/// the same SQL transaction.
pub struct OutboxEventStore<S, O> {
    store: S,
    outbox: O,
    clock: Arc<dyn Clock>,
}

impl<S, O> OutboxEventStore<S, O>
where
    S: EventStore,
    O: OutboxStore,
{
    pub fn new(store: S, outbox: O, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            outbox,
            clock,
        }
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }
}

impl<S, O> EventStore for OutboxEventStore<S, O>
where
    S: EventStore,
    O: OutboxStore,
{
    fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let committed = self
            .store
            .append(aggregate_id, aggregate_type, expected_version, events)?;

        let now = self.clock.now();
        for stored in &committed {
            let envelope = stored.to_envelope().map_err(|e| {
                EventStoreError::StorageFailure(format!("outbox envelope encode failed: {e}"))
            })?;
            let entry = OutboxEntry::pending(envelope, stored.event_type.clone(), now);
            self.outbox
                .enqueue(entry)
                .map_err(|e| EventStoreError::StorageFailure(format!("outbox enqueue failed: {e}")))?;
        }

        Ok(committed)
    }

    fn load(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load(aggregate_id, aggregate_type)
    }

    fn load_after(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_after(aggregate_id, aggregate_type, after_version)
    }

    fn stream_all(
        &self,
        from_cursor: Option<crate::event_store::Cursor>,
        batch_size: usize,
    ) -> Result<Vec<(crate::event_store::Cursor, StoredEvent)>, EventStoreError> {
        self.store.stream_all(from_cursor, batch_size)
    }

    fn has_aggregate(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<bool, EventStoreError> {
        self.store.has_aggregate(aggregate_id, aggregate_type)
    }

    fn current_version(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<u64, EventStoreError> {
        self.store.current_version(aggregate_id, aggregate_type)
    }

    fn save_snapshot(&self, snapshot: crate::event_store::Snapshot) -> Result<(), EventStoreError> {
        self.store.save_snapshot(snapshot)
    }

    fn load_latest_snapshot(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Option<crate::event_store::Snapshot>, EventStoreError> {
        self.store.load_latest_snapshot(aggregate_id, aggregate_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use escore_core::SystemClock;

    fn uncommitted() -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            metadata: Default::default(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn append_creates_one_outbox_row_per_event() {
        let decorated =
            OutboxEventStore::new(InMemoryEventStore::new(), InMemoryOutboxStore::new(), Arc::new(SystemClock));
        let id = AggregateId::new(1);

        decorated
            .append(id, "acct", ExpectedVersion::NoStream, vec![uncommitted(), uncommitted()])
            .unwrap();

        let pending = decorated.outbox().list_by_status(OutboxStatus::Pending).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn claim_batch_is_exclusive_until_released() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        store
            .enqueue(OutboxEntry::pending(
                dummy_envelope(),
                "t".to_string(),
                now,
            ))
            .unwrap();

        let first = store.claim_batch(10, now).unwrap();
        assert_eq!(first.len(), 1);

        let second = store.claim_batch(10, now).unwrap();
        assert!(second.is_empty(), "already-claimed row must not be claimed twice");

        store.release_claim(first[0].id).unwrap();
        let third = store.claim_batch(10, now).unwrap();
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn reclaim_stale_returns_crashed_claims_to_the_pool() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        store
            .enqueue(OutboxEntry::pending(dummy_envelope(), "t".to_string(), now))
            .unwrap();
        store.claim_batch(10, now).unwrap();

        let later = now + chrono::Duration::seconds(60);
        let reclaimed = store.reclaim_stale(later).unwrap();
        assert_eq!(reclaimed, 1);

        assert_eq!(store.claim_batch(10, later).unwrap().len(), 1);
    }

    fn dummy_envelope() -> escore_events::EventEnvelope<serde_json::Value> {
        escore_events::EventEnvelope::new(
            Uuid::now_v7(),
            "test.happened",
            AggregateId::new(1),
            "acct",
            1,
            Utc::now(),
            Default::default(),
            serde_json::json!({}),
        )
    }
}
