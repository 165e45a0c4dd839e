//! Postgres-backed event store.
//!
//! `EventStore` is a synchronous trait (the command-dispatch contract
//! depends on handler errors being the immediate return value), but
//! `sqlx` is async. This adapter bridges the two by borrowing the
//! ambient Tokio runtime via `Handle::try_current()` and blocking on it
//! in every method. Callers must run inside a Tokio runtime (even a
//! current-thread one) for this store to work; the in-memory store has
//! no such requirement.
//!
//! Schema (see the workspace's external-interfaces notes for the exact
//! column list):
//!
//! ```sql
//! create table events (
//!     global_sequence bigserial primary key,
//!     aggregate_id    bigint not null,
//!     aggregate_type  text not null,
//!     version         bigint not null,
//!     event_id        uuid not null,
//!     event_type      text not null,
//!     event_version   integer not null,
//!     occurred_at     timestamptz not null,
//!     metadata        jsonb not null,
//!     payload         jsonb not null,
//!     unique (aggregate_type, aggregate_id, version)
//! );
//!
//! create table snapshots (
//!     aggregate_id    bigint not null,
//!     aggregate_type  text not null,
//!     version         bigint not null,
//!     captured_at     timestamptz not null,
//!     state           jsonb not null,
//!     primary key (aggregate_type, aggregate_id, version)
//! );
//! ```

use std::sync::Arc;

use escore_core::{AggregateId, ExpectedVersion};
use sqlx::PgPool;
use tracing::instrument;

use super::r#trait::{Cursor, EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};

/// Maps a `sqlx::Error` onto `EventStoreError`. The unique constraint on
/// `(aggregate_type, aggregate_id, version)` is how the database enforces
/// optimistic concurrency: a conflicting concurrent append hits it and
/// surfaces as `23505`, which this store treats as a concurrency conflict
/// rather than a generic storage failure.
fn map_sqlx_error(expected: ExpectedVersion, actual: u64, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return EventStoreError::ConcurrencyConflict { expected, actual };
        }
    }
    EventStoreError::StorageFailure(err.to_string())
}

fn block_on<F: std::future::Future>(fut: F) -> Result<F::Output, EventStoreError> {
    tokio::runtime::Handle::try_current()
        .map_err(|_| {
            EventStoreError::StorageFailure(
                "PostgresEventStore requires a Tokio runtime to be reachable".to_string(),
            )
        })
        .map(|handle| handle.block_on(fut))
}

pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, events), fields(aggregate_type, aggregate_id = %aggregate_id), err)]
    async fn append_async(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

        let current: i64 = sqlx::query_scalar(
            "select coalesce(max(version), 0) from events where aggregate_type = $1 and aggregate_id = $2",
        )
        .bind(aggregate_type)
        .bind(aggregate_id.as_u64() as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

        let current = current as u64;
        if !expected_version.matches(current) {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: expected_version,
                actual: current,
            });
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut version = current + 1;
        for event in events {
            let metadata_json = serde_json::to_value(&event.metadata)
                .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

            let global_sequence: i64 = sqlx::query_scalar(
                "insert into events
                    (aggregate_id, aggregate_type, version, event_id, event_type,
                     event_version, occurred_at, metadata, payload)
                 values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 returning global_sequence",
            )
            .bind(aggregate_id.as_u64() as i64)
            .bind(aggregate_type)
            .bind(version as i64)
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&metadata_json)
            .bind(&event.payload)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(expected_version, current, e))?;

            committed.push(StoredEvent {
                global_sequence: global_sequence as u64,
                aggregate_id,
                aggregate_type: aggregate_type.to_string(),
                version,
                event_id: event.event_id,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                metadata: event.metadata,
                payload: event.payload,
            });
            version += 1;
        }

        tx.commit()
            .await
            .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

        Ok(committed)
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.append_async(aggregate_id, aggregate_type, expected_version, events))?
    }

    fn load(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.load_after(aggregate_id, aggregate_type, 0)
    }

    fn load_after(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(async {
            let rows: Vec<(i64, i64, String, i64, uuid::Uuid, String, i32, chrono::DateTime<chrono::Utc>, serde_json::Value, serde_json::Value)> = sqlx::query_as(
                "select global_sequence, aggregate_id, aggregate_type, version, event_id,
                        event_type, event_version, occurred_at, metadata, payload
                 from events
                 where aggregate_type = $1 and aggregate_id = $2 and version > $3
                 order by version asc",
            )
            .bind(aggregate_type)
            .bind(aggregate_id.as_u64() as i64)
            .bind(after_version as i64)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

            Ok(rows
                .into_iter()
                .map(|(global_sequence, aggregate_id, aggregate_type, version, event_id, event_type, event_version, occurred_at, metadata, payload)| {
                    StoredEvent {
                        global_sequence: global_sequence as u64,
                        aggregate_id: AggregateId::new(aggregate_id as u64),
                        aggregate_type,
                        version: version as u64,
                        event_id,
                        event_type,
                        event_version: event_version as u32,
                        occurred_at,
                        metadata: serde_json::from_value(metadata).unwrap_or_default(),
                        payload,
                    }
                })
                .collect())
        })?
    }

    fn stream_all(
        &self,
        from_cursor: Option<Cursor>,
        batch_size: usize,
    ) -> Result<Vec<(Cursor, StoredEvent)>, EventStoreError> {
        let from = from_cursor.map(|c| c.0 as i64).unwrap_or(0);
        block_on(async {
            let rows: Vec<(i64, i64, String, i64, uuid::Uuid, String, i32, chrono::DateTime<chrono::Utc>, serde_json::Value, serde_json::Value)> = sqlx::query_as(
                "select global_sequence, aggregate_id, aggregate_type, version, event_id,
                        event_type, event_version, occurred_at, metadata, payload
                 from events
                 where global_sequence > $1
                 order by global_sequence asc
                 limit $2",
            )
            .bind(from)
            .bind(batch_size as i64)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

            Ok(rows
                .into_iter()
                .map(|(global_sequence, aggregate_id, aggregate_type, version, event_id, event_type, event_version, occurred_at, metadata, payload)| {
                    let stored = StoredEvent {
                        global_sequence: global_sequence as u64,
                        aggregate_id: AggregateId::new(aggregate_id as u64),
                        aggregate_type,
                        version: version as u64,
                        event_id,
                        event_type,
                        event_version: event_version as u32,
                        occurred_at,
                        metadata: serde_json::from_value(metadata).unwrap_or_default(),
                        payload,
                    };
                    (Cursor(stored.global_sequence), stored)
                })
                .collect())
        })?
    }

    fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        block_on(async {
            sqlx::query(
                "insert into snapshots (aggregate_id, aggregate_type, version, captured_at, state)
                 values ($1, $2, $3, $4, $5)
                 on conflict (aggregate_type, aggregate_id, version) do update set state = excluded.state",
            )
            .bind(snapshot.aggregate_id.as_u64() as i64)
            .bind(&snapshot.aggregate_type)
            .bind(snapshot.version as i64)
            .bind(snapshot.captured_at)
            .bind(&snapshot.state)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;
            Ok(())
        })?
    }

    fn load_latest_snapshot(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        block_on(async {
            let row: Option<(i64, String, i64, chrono::DateTime<chrono::Utc>, serde_json::Value)> = sqlx::query_as(
                "select aggregate_id, aggregate_type, version, captured_at, state
                 from snapshots
                 where aggregate_type = $1 and aggregate_id = $2
                 order by version desc
                 limit 1",
            )
            .bind(aggregate_type)
            .bind(aggregate_id.as_u64() as i64)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| EventStoreError::StorageFailure(e.to_string()))?;

            Ok(row.map(|(aggregate_id, aggregate_type, version, captured_at, state)| Snapshot {
                aggregate_id: AggregateId::new(aggregate_id as u64),
                aggregate_type,
                version: version as u64,
                captured_at,
                state,
            }))
        })?
    }
}
