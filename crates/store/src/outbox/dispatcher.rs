//! Background dispatcher that drains the outbox, publishing events
//! on-behalf of completed saves. A worker loop over a bounded poll
//! interval: claim a batch, publish each entry, retry with backoff on
//! failure, release any in-flight claims on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use escore_core::Clock;
use escore_events::EventBus;
use serde_json::Value as JsonValue;

use super::store::OutboxStore;
use super::types::RetryPolicy;

/// Tunables for a single dispatcher instance.
#[derive(Debug, Clone)]
pub struct OutboxDispatcherConfig {
    pub name: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
    /// Claims older than this are assumed to belong to a crashed
    /// dispatcher and are released back to `Pending` on startup and
    /// periodically thereafter.
    pub claim_timeout: Duration,
}

impl Default for OutboxDispatcherConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            poll_interval: Duration::from_millis(100),
            batch_size: 20,
            retry_policy: RetryPolicy::default(),
            claim_timeout: Duration::from_secs(30),
        }
    }
}

impl OutboxDispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    published: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    ticks: AtomicU64,
}

/// Point-in-time counters for a running dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    pub published: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub ticks: u64,
}

/// Handle to a spawned dispatcher thread.
pub struct OutboxDispatcherHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
    stats: Arc<StatsInner>,
}

impl OutboxDispatcherHandle {
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            published: self.stats.published.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            dead_lettered: self.stats.dead_lettered.load(Ordering::Relaxed),
            ticks: self.stats.ticks.load(Ordering::Relaxed),
        }
    }

    /// Signals the loop to stop after its current batch and blocks until
    /// the thread exits.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns a dispatcher thread draining `outbox` and publishing to `bus`.
pub fn spawn<O, B>(
    outbox: Arc<O>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
    config: OutboxDispatcherConfig,
) -> OutboxDispatcherHandle
where
    O: OutboxStore + 'static,
    B: EventBus<escore_events::EventEnvelope<JsonValue>> + 'static,
{
    let (tx, rx) = mpsc::channel();
    let stats = Arc::new(StatsInner::default());
    let loop_stats = Arc::clone(&stats);
    let name = config.name.clone();

    let join = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            run_loop(outbox, bus, clock, config, rx, loop_stats);
        })
        .unwrap_or_else(|e| panic!("failed to spawn outbox dispatcher '{name}': {e}"));

    OutboxDispatcherHandle {
        shutdown: tx,
        join: Some(join),
        stats,
    }
}

fn run_loop<O, B>(
    outbox: Arc<O>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
    config: OutboxDispatcherConfig,
    shutdown: mpsc::Receiver<()>,
    stats: Arc<StatsInner>,
) where
    O: OutboxStore,
    B: EventBus<escore_events::EventEnvelope<JsonValue>>,
{
    let claim_timeout = chrono::Duration::from_std(config.claim_timeout)
        .unwrap_or_else(|_| chrono::Duration::seconds(30));

    let stale_cutoff = clock.now() - claim_timeout;
    let _ = outbox.reclaim_stale(stale_cutoff);

    loop {
        if shutdown.try_recv().is_ok() {
            return;
        }

        let now = clock.now();
        let claimed = match outbox.claim_batch(config.batch_size, now) {
            Ok(rows) => rows,
            Err(_) => {
                std::thread::sleep(config.poll_interval);
                continue;
            }
        };

        if claimed.is_empty() {
            std::thread::sleep(config.poll_interval);
            continue;
        }

        for (i, entry) in claimed.iter().enumerate() {
            if shutdown.try_recv().is_ok() {
                for remaining in &claimed[i..] {
                    let _ = outbox.release_claim(remaining.id);
                }
                return;
            }

            match bus.publish(entry.envelope.clone()) {
                Ok(()) => {
                    let _ = outbox.mark_published(entry.id, clock.now());
                    stats.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    let attempt = entry.retry_count + 1;
                    if config.retry_policy.should_retry(attempt) {
                        let delay = config.retry_policy.delay_for_attempt(attempt);
                        let next_attempt_at = clock.now()
                            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                        let _ = outbox.mark_failed(entry.id, format!("{err:?}"), Some(next_attempt_at));
                    } else {
                        let _ = outbox.mark_failed(entry.id, format!("{err:?}"), None);
                        stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    }
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        stats.ticks.fetch_add(1, Ordering::Relaxed);
    }
}
