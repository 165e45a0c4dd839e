//! Projection registration and lifecycle: one poll-loop thread per running
//! projection, draining the event store's global cursor and checkpointing
//! after each successful handle.
//!
//! Grounded on `infra::workers::projection_worker` for the thread + `mpsc`
//! shutdown + timed-poll shape, generalized from "subscribe to one event
//! bus topic" to "poll `EventStore::stream_all` from a durable checkpoint",
//! and on `infra::jobs::executor::JobExecutor` for the registry-of-named-
//! workers-with-a-handle-map structure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use escore_store::event_store::EventStore;
use escore_store::outbox::RetryPolicy;
use tracing::{error, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::error::ProjectionError;
use crate::projection::{Projection, ProjectionState, ProjectionStatus};

#[derive(Debug, Clone)]
pub struct ProjectionManagerConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ProjectionManagerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(200),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct StatusInner {
    state: Mutex<ProjectionState>,
    processed_count: AtomicU64,
    failed_count: AtomicU64,
    last_event_id: Mutex<Option<Uuid>>,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    updated_at: Mutex<Option<DateTime<Utc>>>,
}

struct Registration {
    projection: Arc<dyn Projection>,
    status: Arc<StatusInner>,
    paused: Arc<AtomicBool>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Owns every registered projection, its checkpoint, and its worker thread
/// (if started).
pub struct ProjectionManager<S: EventStore + 'static> {
    store: Arc<S>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: ProjectionManagerConfig,
    registrations: RwLock<HashMap<String, Arc<Registration>>>,
}

impl<S: EventStore + 'static> ProjectionManager<S> {
    pub fn new(store: Arc<S>, checkpoints: Arc<dyn CheckpointStore>, config: ProjectionManagerConfig) -> Self {
        Self {
            store,
            checkpoints,
            config,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, projection: Arc<dyn Projection>) -> Result<(), ProjectionError> {
        let name = projection.name().to_string();
        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        if registrations.contains_key(&name) {
            return Err(ProjectionError::AlreadyRegistered(name));
        }
        registrations.insert(
            name,
            Arc::new(Registration {
                projection,
                status: Arc::new(StatusInner::default()),
                paused: Arc::new(AtomicBool::new(false)),
                shutdown: Mutex::new(None),
                thread: Mutex::new(None),
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<(), ProjectionError> {
        self.stop(name)?;
        self.registrations.write().unwrap_or_else(|e| e.into_inner()).remove(name);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Arc<Registration>, ProjectionError> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ProjectionError::NotFound(name.to_string()))
    }

    /// Starts the poll loop for `name` if it isn't already running.
    pub fn start(&self, name: &str) -> Result<(), ProjectionError> {
        let registration = self.get(name)?;
        let mut thread_guard = registration.thread.lock().unwrap_or_else(|e| e.into_inner());
        if thread_guard.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let store = Arc::clone(&self.store);
        let checkpoints = Arc::clone(&self.checkpoints);
        let config = self.config.clone();
        let projection = Arc::clone(&registration.projection);
        let status = Arc::clone(&registration.status);
        let paused = Arc::clone(&registration.paused);

        *registration.status.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectionState::Running;
        paused.store(false, Ordering::SeqCst);

        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("projection-{thread_name}"))
            .spawn(move || run_loop(projection, store, checkpoints, config, status, paused, rx))
            .unwrap_or_else(|e| panic!("failed to spawn projection worker '{thread_name}': {e}"));

        *thread_guard = Some(handle);
        *registration.shutdown.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(())
    }

    pub fn pause(&self, name: &str) -> Result<(), ProjectionError> {
        let registration = self.get(name)?;
        registration.paused.store(true, Ordering::SeqCst);
        *registration.status.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectionState::Paused;
        Ok(())
    }

    pub fn resume(&self, name: &str) -> Result<(), ProjectionError> {
        let registration = self.get(name)?;
        registration.paused.store(false, Ordering::SeqCst);
        *registration.status.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectionState::Running;
        Ok(())
    }

    /// Stops `name`'s worker loop, if running, and waits for it to exit.
    pub fn stop(&self, name: &str) -> Result<(), ProjectionError> {
        let registration = self.get(name)?;
        if let Some(tx) = registration.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(());
        }
        if let Some(handle) = registration.thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        *registration.status.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectionState::Stopped;
        Ok(())
    }

    /// Resets `name`'s checkpoint and replays the full event history
    /// through `Projection::rebuild`. The loop is stopped for the
    /// duration and restarted afterward if it was running.
    pub fn rebuild(&self, name: &str) -> Result<(), ProjectionError> {
        let registration = self.get(name)?;
        let was_running = matches!(
            *registration.status.state.lock().unwrap_or_else(|e| e.into_inner()),
            ProjectionState::Running | ProjectionState::Error
        );
        self.stop(name)?;
        self.checkpoints.clear_checkpoint(name);

        let mut cursor = None;
        let mut history = Vec::new();
        loop {
            let batch = self.store.stream_all(cursor, self.config.batch_size)?;
            if batch.is_empty() {
                break;
            }
            cursor = batch.last().map(|(c, _)| *c);
            history.extend(batch.into_iter().map(|(_, event)| event));
        }

        registration
            .projection
            .rebuild(&history)
            .map_err(|e| ProjectionError::HandlerFailure(e.0))?;

        if let Some(cursor) = cursor {
            self.checkpoints.set_checkpoint(name, cursor);
        }

        if was_running {
            self.start(name)?;
        }
        Ok(())
    }

    pub fn status(&self, name: &str) -> Result<ProjectionStatus, ProjectionError> {
        let registration = self.get(name)?;
        Ok(snapshot_status(name, &registration))
    }

    pub fn status_all(&self) -> Vec<ProjectionStatus> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, registration)| snapshot_status(name, registration))
            .collect()
    }

    /// Stops every running projection, waiting up to `grace` in total.
    pub fn stop_all(&self, grace: Duration) {
        let names: Vec<String> = self.registrations.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        let deadline = std::time::Instant::now() + grace;
        for name in names {
            if let Err(err) = self.stop(&name) {
                warn!(projection = %name, error = ?err, "failed to stop projection during teardown");
            }
            if std::time::Instant::now() > deadline {
                break;
            }
        }
    }
}

fn snapshot_status(name: &str, registration: &Registration) -> ProjectionStatus {
    ProjectionStatus {
        name: name.to_string(),
        state: *registration.status.state.lock().unwrap_or_else(|e| e.into_inner()),
        processed_count: registration.status.processed_count.load(Ordering::Relaxed),
        failed_count: registration.status.failed_count.load(Ordering::Relaxed),
        last_event_id: *registration.status.last_event_id.lock().unwrap_or_else(|e| e.into_inner()),
        last_event_at: *registration.status.last_event_at.lock().unwrap_or_else(|e| e.into_inner()),
        last_error: registration.status.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        updated_at: registration
            .status
            .updated_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(Utc::now),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop<S: EventStore>(
    projection: Arc<dyn Projection>,
    store: Arc<S>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: ProjectionManagerConfig,
    status: Arc<StatusInner>,
    paused: Arc<AtomicBool>,
    shutdown: mpsc::Receiver<()>,
) {
    let name = projection.name().to_string();
    let mut consecutive_failures: u32 = 0;

    loop {
        if shutdown.try_recv().is_ok() {
            return;
        }

        if paused.load(Ordering::SeqCst) {
            std::thread::sleep(config.poll_interval);
            continue;
        }

        let cursor = checkpoints.get_checkpoint(&name);
        let batch = match store.stream_all(cursor, config.batch_size) {
            Ok(batch) => batch,
            Err(err) => {
                error!(projection = %name, error = ?err, "projection failed to read from the event store");
                std::thread::sleep(config.poll_interval);
                continue;
            }
        };

        if batch.is_empty() {
            std::thread::sleep(config.poll_interval);
            continue;
        }

        for (position, event) in &batch {
            if shutdown.try_recv().is_ok() {
                return;
            }

            let handled_types = projection.handled_event_types();
            if !handled_types.is_empty() && !handled_types.contains(&event.event_type.as_str()) {
                checkpoints.set_checkpoint(&name, *position);
                continue;
            }

            match projection.handle(event) {
                Ok(()) => {
                    consecutive_failures = 0;
                    checkpoints.set_checkpoint(&name, *position);
                    status.processed_count.fetch_add(1, Ordering::Relaxed);
                    *status.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectionState::Running;
                    *status.last_event_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(event.event_id);
                    *status.last_event_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(event.occurred_at);
                    *status.updated_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(projection = %name, event_id = %event.event_id, error = %err, "projection handler failed, checkpoint not advanced");
                    status.failed_count.fetch_add(1, Ordering::Relaxed);
                    *status.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectionState::Error;
                    *status.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
                    *status.updated_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());

                    let delay = config.retry_policy.delay_for_attempt(consecutive_failures);
                    std::thread::sleep(delay);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::projection::ProjectionHandlerError;
    use escore_core::AggregateId;
    use escore_store::event_store::{EventStoreError, InMemoryEventStore, UncommittedEvent};
    use std::sync::atomic::AtomicUsize;

    struct CountingProjection {
        seen: Mutex<Vec<String>>,
        fail_until: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl CountingProjection {
        fn new(fail_until: usize) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_until: AtomicUsize::new(fail_until),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    impl Projection for CountingProjection {
        fn name(&self) -> &str {
            "counting"
        }

        fn handled_event_types(&self) -> &[&str] {
            &[]
        }

        fn handle(&self, event: &escore_store::event_store::StoredEvent) -> Result<(), ProjectionHandlerError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_until.load(Ordering::SeqCst) {
                return Err(ProjectionHandlerError::new("transient failure"));
            }
            self.seen.lock().unwrap().push(event.event_id.to_string());
            Ok(())
        }
    }

    fn append_one(store: &InMemoryEventStore) -> Result<(), EventStoreError> {
        store.append(
            AggregateId::new(1),
            "order",
            escore_core::ExpectedVersion::Any,
            vec![UncommittedEvent {
                event_id: Uuid::now_v7(),
                event_type: "OrderPlaced".to_string(),
                event_version: 1,
                occurred_at: Utc::now(),
                metadata: Default::default(),
                payload: serde_json::json!({}),
            }],
        )?;
        Ok(())
    }

    #[test]
    fn processes_events_in_order_and_advances_the_checkpoint() {
        let store = Arc::new(InMemoryEventStore::new());
        for _ in 0..3 {
            append_one(&store).unwrap();
        }

        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let manager = ProjectionManager::new(
            Arc::clone(&store),
            Arc::clone(&checkpoints),
            ProjectionManagerConfig {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let projection = Arc::new(CountingProjection::new(0));
        manager.register(projection.clone()).unwrap();
        manager.start("counting").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while projection.seen.lock().unwrap().len() < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(projection.seen.lock().unwrap().len(), 3);
        assert!(checkpoints.get_checkpoint("counting").is_some());
        manager.stop("counting").unwrap();
    }

    #[test]
    fn a_failing_handler_does_not_advance_the_checkpoint_and_enters_error_status() {
        let store = Arc::new(InMemoryEventStore::new());
        append_one(&store).unwrap();

        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let manager = ProjectionManager::new(
            Arc::clone(&store),
            Arc::clone(&checkpoints),
            ProjectionManagerConfig {
                poll_interval: Duration::from_millis(10),
                retry_policy: RetryPolicy {
                    jitter: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let projection = Arc::new(CountingProjection::new(usize::MAX));
        manager.register(projection.clone()).unwrap();
        manager.start("counting").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        assert!(checkpoints.get_checkpoint("counting").is_none());
        let status = manager.status("counting").unwrap();
        assert_eq!(status.state, ProjectionState::Error);
        assert!(status.failed_count >= 1);
        manager.stop("counting").unwrap();
    }

    #[test]
    fn unregistering_an_unknown_projection_reports_not_found() {
        let store = Arc::new(InMemoryEventStore::new());
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let manager = ProjectionManager::new(store, checkpoints, ProjectionManagerConfig::default());
        let err = manager.unregister("missing").unwrap_err();
        assert!(matches!(err, ProjectionError::NotFound(_)));
    }
}
