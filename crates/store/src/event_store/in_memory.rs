use std::collections::HashMap;
use std::sync::RwLock;

use escore_core::{AggregateId, ExpectedVersion};

use super::r#trait::{Cursor, EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};

type StreamKey = (String, AggregateId);

/// In-memory append-only event store.
///
/// Intended for tests and examples; not optimized for large histories.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
    /// Every committed event, in global commit order, for `stream_all`.
    all: RwLock<Vec<StoredEvent>>,
    snapshots: RwLock<HashMap<StreamKey, Snapshot>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version_locked(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let key = (aggregate_type.to_string(), aggregate_id);

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::StorageFailure("streams lock poisoned".into()))?;
        let mut all = self
            .all
            .write()
            .map_err(|_| EventStoreError::StorageFailure("all lock poisoned".into()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version_locked(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: expected_version,
                actual: current,
            });
        }

        let mut version = current + 1;
        let mut global_sequence = all.len() as u64 + 1;
        let mut committed = Vec::with_capacity(events.len());

        for e in events {
            let stored = StoredEvent {
                global_sequence,
                aggregate_id,
                aggregate_type: aggregate_type.to_string(),
                version,
                event_id: e.event_id,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                metadata: e.metadata,
                payload: e.payload,
            };
            version += 1;
            global_sequence += 1;
            stream.push(stored.clone());
            all.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = (aggregate_type.to_string(), aggregate_id);
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::StorageFailure("streams lock poisoned".into()))?;
        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn load_after(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        Ok(self
            .load(aggregate_id, aggregate_type)?
            .into_iter()
            .filter(|e| e.version > after_version)
            .collect())
    }

    fn stream_all(
        &self,
        from_cursor: Option<Cursor>,
        batch_size: usize,
    ) -> Result<Vec<(Cursor, StoredEvent)>, EventStoreError> {
        let all = self
            .all
            .read()
            .map_err(|_| EventStoreError::StorageFailure("all lock poisoned".into()))?;

        let from = from_cursor.map(|c| c.0).unwrap_or(0);
        Ok(all
            .iter()
            .filter(|e| e.global_sequence > from)
            .take(batch_size)
            .map(|e| (Cursor(e.global_sequence), e.clone()))
            .collect())
    }

    fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        let key = (snapshot.aggregate_type.clone(), snapshot.aggregate_id);
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| EventStoreError::StorageFailure("snapshots lock poisoned".into()))?;
        snapshots.insert(key, snapshot);
        Ok(())
    }

    fn load_latest_snapshot(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        let key = (aggregate_type.to_string(), aggregate_id);
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| EventStoreError::StorageFailure("snapshots lock poisoned".into()))?;
        Ok(snapshots.get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn event(n: u32) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            metadata: Default::default(),
            payload: serde_json::json!({ "n": n }),
        }
    }

    #[test]
    fn append_assigns_contiguous_versions() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new(1);

        let committed = store
            .append(id, "acct", ExpectedVersion::NoStream, vec![event(1), event(2)])
            .unwrap();

        assert_eq!(committed[0].version, 1);
        assert_eq!(committed[1].version, 2);
        assert_eq!(store.current_version(id, "acct").unwrap(), 2);

        let loaded = store.load(id, "acct").unwrap();
        let versions: Vec<u64> = loaded.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn append_rejects_stale_expected_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new(1);
        store
            .append(id, "acct", ExpectedVersion::NoStream, vec![event(1)])
            .unwrap();

        let err = store
            .append(id, "acct", ExpectedVersion::Exact(0), vec![event(2)])
            .unwrap_err();

        assert!(matches!(
            err,
            EventStoreError::ConcurrencyConflict { expected: ExpectedVersion::Exact(0), actual: 1 }
        ));
        assert_eq!(store.current_version(id, "acct").unwrap(), 1);
    }

    #[test]
    fn concurrent_writers_only_one_wins_at_a_given_expected_version() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = AggregateId::new(42);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || {
                        store.append(id, "acct", ExpectedVersion::NoStream, vec![event(i)])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert_eq!(store.current_version(id, "acct").unwrap(), 1);
        assert_eq!(store.load(id, "acct").unwrap().len(), 1);
    }

    #[test]
    fn stream_all_orders_globally_and_resumes_from_cursor() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new(1);
        let b = AggregateId::new(2);
        store
            .append(a, "acct", ExpectedVersion::NoStream, vec![event(1)])
            .unwrap();
        store
            .append(b, "acct", ExpectedVersion::NoStream, vec![event(2)])
            .unwrap();

        let first_batch = store.stream_all(None, 1).unwrap();
        assert_eq!(first_batch.len(), 1);
        let (cursor, _) = first_batch[0];

        let second_batch = store.stream_all(Some(cursor), 10).unwrap();
        assert_eq!(second_batch.len(), 1);
        assert!(second_batch[0].0 .0 > cursor.0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 128,
                ..ProptestConfig::default()
            })]

            /// For any sequence of append batch sizes, the resulting stream
            /// versions are dense and start at 1, with no gaps and no
            /// regressions, regardless of how the batches are split.
            #[test]
            fn append_assigns_dense_contiguous_versions_for_any_batch_sizes(
                batch_sizes in prop::collection::vec(1usize..8, 1..12)
            ) {
                let store = InMemoryEventStore::new();
                let id = AggregateId::new(1);
                let mut expected_next = 1u64;

                for size in batch_sizes {
                    let events: Vec<UncommittedEvent> = (0..size as u32).map(event).collect();
                    let version_before = expected_next - 1;
                    let committed = store
                        .append(id, "acct", ExpectedVersion::Exact(version_before), events)
                        .unwrap();

                    let versions: Vec<u64> = committed.iter().map(|e| e.version).collect();
                    let contiguous = versions
                        .windows(2)
                        .all(|w| w[1] == w[0] + 1);
                    prop_assert!(contiguous);
                    prop_assert_eq!(versions[0], expected_next);

                    expected_next += size as u64;
                }

                prop_assert_eq!(store.current_version(id, "acct").unwrap(), expected_next - 1);
            }

            /// When N threads race to append the first event of a fresh
            /// stream under `ExpectedVersion::NoStream`, exactly one wins
            /// regardless of N.
            #[test]
            fn only_one_concurrent_writer_wins_at_no_stream_for_any_thread_count(
                writer_count in 2usize..12
            ) {
                let store = Arc::new(InMemoryEventStore::new());
                let id = AggregateId::new(99);

                let results: Vec<_> = std::thread::scope(|scope| {
                    let handles: Vec<_> = (0..writer_count)
                        .map(|i| {
                            let store = Arc::clone(&store);
                            scope.spawn(move || {
                                store.append(id, "acct", ExpectedVersion::NoStream, vec![event(i as u32)])
                            })
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().unwrap()).collect()
                });

                let successes = results.iter().filter(|r| r.is_ok()).count();
                prop_assert_eq!(successes, 1);
                prop_assert_eq!(store.current_version(id, "acct").unwrap(), 1);
            }
        }
    }

    #[test]
    fn snapshot_round_trips() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new(7);
        assert!(store.load_latest_snapshot(id, "acct").unwrap().is_none());

        store
            .save_snapshot(Snapshot {
                aggregate_id: id,
                aggregate_type: "acct".to_string(),
                version: 10,
                captured_at: Utc::now(),
                state: serde_json::json!({ "balance": 100 }),
            })
            .unwrap();

        let snap = store.load_latest_snapshot(id, "acct").unwrap().unwrap();
        assert_eq!(snap.version, 10);
    }
}
