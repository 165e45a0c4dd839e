//! Benchmarks for the in-memory event store: append latency and throughput,
//! and a naive CRUD baseline for comparison.
//!
//! Grounded on `infra/benches/event_sourcing_benchmarks.rs`, narrowed to
//! this crate's own primitives (no dispatcher or projection dependency,
//! to avoid a dev-dependency cycle across workspace crates).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use escore_core::{AggregateId, ExpectedVersion};
use escore_store::event_store::{Cursor, EventStore, InMemoryEventStore, UncommittedEvent};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Direct key-value updates with no event history, as a baseline for how
/// much overhead append-and-replay adds over a plain mutable map.
#[derive(Clone)]
struct NaiveCrudStore {
    inner: Arc<RwLock<HashMap<u64, i64>>>,
}

impl NaiveCrudStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn create(&self, id: u64) {
        self.inner.write().unwrap().insert(id, 0);
    }

    fn adjust(&self, id: u64, delta: i64) {
        if let Some(balance) = self.inner.write().unwrap().get_mut(&id) {
            *balance += delta;
        }
    }
}

fn uncommitted(event_type: &str, payload: serde_json::Value) -> UncommittedEvent {
    UncommittedEvent {
        event_id: uuid::Uuid::now_v7(),
        event_type: event_type.to_string(),
        event_version: 1,
        occurred_at: Utc::now(),
        metadata: Default::default(),
        payload,
    }
}

fn bench_append_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_latency");
    group.sample_size(200);

    group.bench_function("append_first_event", |b| {
        b.iter(|| {
            let store = InMemoryEventStore::new();
            let id = AggregateId::new(black_box(1));
            store
                .append(
                    id,
                    "account",
                    ExpectedVersion::Any,
                    vec![uncommitted("AccountOpened", serde_json::json!({}))],
                )
                .unwrap();
        });
    });

    group.bench_function("append_with_existing_history", |b| {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new(1);
        store
            .append(id, "account", ExpectedVersion::Any, vec![uncommitted("AccountOpened", serde_json::json!({}))])
            .unwrap();

        b.iter(|| {
            let version = store.current_version(id, "account").unwrap();
            store
                .append(
                    id,
                    "account",
                    ExpectedVersion::Exact(version),
                    vec![uncommitted("BalanceAdjusted", serde_json::json!({ "delta": black_box(5) }))],
                )
                .unwrap();
        });
    });

    group.finish();
}

fn bench_batch_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_append_throughput");

    for batch_size in [1u64, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), &batch_size, |b, &size| {
            b.iter(|| {
                let store = InMemoryEventStore::new();
                let id = AggregateId::new(1);
                let events: Vec<UncommittedEvent> = (0..size)
                    .map(|i| uncommitted("BalanceAdjusted", serde_json::json!({ "delta": i })))
                    .collect();
                black_box(store.append(id, "account", ExpectedVersion::Any, events).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_stream_all_catch_up(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_all_catch_up");

    for event_count in [10u64, 100, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::new("drain_in_batches_of_100", event_count), &event_count, |b, &count| {
            let store = InMemoryEventStore::new();
            for shard in 0..10 {
                let id = AggregateId::new(shard + 1);
                let events: Vec<UncommittedEvent> = (0..(count / 10).max(1))
                    .map(|i| uncommitted("BalanceAdjusted", serde_json::json!({ "delta": i })))
                    .collect();
                store.append(id, "account", ExpectedVersion::Any, events).unwrap();
            }

            b.iter(|| {
                let mut cursor: Option<Cursor> = None;
                loop {
                    let batch = store.stream_all(cursor, 100).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    cursor = batch.last().map(|(c, _)| *c);
                    black_box(&batch);
                }
            });
        });
    }

    group.finish();
}

fn bench_event_sourcing_vs_naive_crud(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_sourcing_vs_naive_crud");
    group.sample_size(500);

    group.bench_function("event_sourced_create_and_adjust", |b| {
        b.iter(|| {
            let store = InMemoryEventStore::new();
            let id = AggregateId::new(1);
            store
                .append(id, "account", ExpectedVersion::Any, vec![uncommitted("AccountOpened", serde_json::json!({}))])
                .unwrap();
            let version = store.current_version(id, "account").unwrap();
            store
                .append(
                    id,
                    "account",
                    ExpectedVersion::Exact(version),
                    vec![uncommitted("BalanceAdjusted", serde_json::json!({ "delta": 10 }))],
                )
                .unwrap();
        });
    });

    group.bench_function("naive_crud_create_and_adjust", |b| {
        let store = NaiveCrudStore::new();
        b.iter(|| {
            store.create(1);
            store.adjust(1, 10);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_append_latency,
    bench_batch_append_throughput,
    bench_stream_all_catch_up,
    bench_event_sourcing_vs_naive_crud
);
criterion_main!(benches);
