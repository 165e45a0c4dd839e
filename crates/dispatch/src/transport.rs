//! Transport abstraction: `send`/`subscribe`/`start`/`close`, with two
//! concrete shapes required by the framework — a queued, worker-pool-backed
//! transport for fire-and-forget delivery, and a synchronous transport that
//! invokes the handler inline so its error is the immediate return value.
//!
//! The worker-pool half is a thread + `mpsc` shutdown channel +
//! `recv_timeout` loop, the same shape used by every other long-running
//! consumer in this framework (outbox dispatcher, projection runner).

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::error::DispatchError;

pub type HandlerResult = Result<(), DispatchError>;
pub type Handler<M> = dyn Fn(M) -> HandlerResult + Send + Sync;

/// A `send`/`subscribe`/`start`/`close` substrate, generic over the message
/// type it carries (`CommandEnvelope` for the command bus; any
/// `Send + 'static` payload in principle).
pub trait Transport<M>: Send + Sync
where
    M: Send + 'static,
{
    /// Routes `message` to `topic`'s handler. Returns the handler's result
    /// when the transport observes it synchronously (`SyncTransport`
    /// always does); `Ok(None)` when the message was merely accepted for
    /// asynchronous delivery.
    fn send(&self, topic: &str, message: M) -> Result<Option<HandlerResult>, DispatchError>;

    /// Registers the handler for `topic`. A second `subscribe` on the same
    /// topic replaces the first.
    fn subscribe(&self, topic: &str, handler: Box<Handler<M>>);

    /// Idempotently starts background delivery. No-op for transports with
    /// no background loop (`SyncTransport`).
    fn start(&self);

    /// Stops accepting new messages and drains in-flight work.
    fn close(&self);
}

/// Invokes the registered handler inline, on the caller's thread. Used
/// where callers depend on the handler's error being the immediate return
/// value — notably the command bus, whose dispatch contract (and the saga
/// orchestrator built on it) requires synchronous business-failure
/// reporting.
#[derive(Default)]
pub struct SyncTransport<M> {
    handlers: RwLock<HashMap<String, Arc<Handler<M>>>>,
}

impl<M> SyncTransport<M> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl<M> Transport<M> for SyncTransport<M>
where
    M: Send + 'static,
{
    fn send(&self, topic: &str, message: M) -> Result<Option<HandlerResult>, DispatchError> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned();

        match handler {
            Some(handler) => Ok(Some(handler(message))),
            None => Err(DispatchError::HandlerNotFound(topic.to_string())),
        }
    }

    fn subscribe(&self, topic: &str, handler: Box<Handler<M>>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string(), Arc::from(handler));
    }

    fn start(&self) {}

    fn close(&self) {}
}

struct TopicQueue<M> {
    sender: SyncSender<M>,
}

/// Per-topic buffered channels fed into a shared worker pool. `send`
/// enqueues and returns immediately (`Ok(None)`); handler errors are
/// logged rather than surfaced to the caller. FIFO within a topic holds
/// when `worker_count <= 1`; with more workers, delivery order across
/// messages enqueued concurrently is best-effort.
pub struct InMemoryQueuedTransport<M>
where
    M: Send + 'static,
{
    worker_count: usize,
    queue_capacity: usize,
    queues: RwLock<HashMap<String, TopicQueue<M>>>,
    handlers: RwLock<HashMap<String, Arc<Handler<M>>>>,
    workers: Mutex<Vec<WorkerSet<M>>>,
}

struct WorkerSet<M> {
    topic: String,
    threads: Vec<JoinHandle<()>>,
    receiver: Option<Receiver<M>>,
}

impl<M> InMemoryQueuedTransport<M>
where
    M: Send + 'static,
{
    /// `worker_count` defaults to the number of logical CPUs when `None`.
    pub fn new(worker_count: Option<usize>, queue_capacity: usize) -> Self {
        Self {
            worker_count: worker_count
                .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)),
            queue_capacity,
            queues: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> Transport<M> for InMemoryQueuedTransport<M>
where
    M: Send + 'static,
{
    fn send(&self, topic: &str, message: M) -> Result<Option<HandlerResult>, DispatchError> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        let queue = queues
            .get(topic)
            .ok_or_else(|| DispatchError::HandlerNotFound(topic.to_string()))?;

        queue
            .sender
            .send(message)
            .map_err(|_| DispatchError::InvalidCommand(format!("transport queue for '{topic}' is closed")))?;

        Ok(None)
    }

    fn subscribe(&self, topic: &str, handler: Box<Handler<M>>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string(), Arc::from(handler));

        let (sender, receiver) = mpsc::sync_channel(self.queue_capacity.max(1));
        self.queues
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string(), TopicQueue { sender });

        self.workers.lock().unwrap_or_else(|e| e.into_inner()).push(WorkerSet {
            topic: topic.to_string(),
            threads: Vec::new(),
            receiver: Some(receiver),
        });
    }

    fn start(&self) {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());

        for set in workers.iter_mut() {
            if !set.threads.is_empty() {
                continue; // already started; idempotent.
            }
            let Some(receiver) = set.receiver.take() else {
                continue;
            };
            let Some(handler) = handlers.get(&set.topic).cloned() else {
                continue;
            };

            let receiver = Arc::new(Mutex::new(receiver));
            for worker_id in 0..self.worker_count.max(1) {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let topic = set.topic.clone();
                let thread = std::thread::Builder::new()
                    .name(format!("transport-{topic}-{worker_id}"))
                    .spawn(move || loop {
                        let message = {
                            let rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
                            rx.recv_timeout(Duration::from_millis(200))
                        };
                        match message {
                            Ok(message) => {
                                if let Err(err) = handler(message) {
                                    warn!(topic = %topic, error = ?err, "queued transport handler failed");
                                }
                            }
                            Err(mpsc::RecvTimeoutError::Timeout) => continue,
                            Err(mpsc::RecvTimeoutError::Disconnected) => return,
                        }
                    })
                    .expect("failed to spawn transport worker thread");
                set.threads.push(thread);
            }
        }
    }

    fn close(&self) {
        // Dropping the senders disconnects every worker's receiver, which
        // causes `recv_timeout` to return `Disconnected` and the loop to
        // exit after it finishes any message already in hand.
        self.queues.write().unwrap_or_else(|e| e.into_inner()).clear();

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for set in workers.iter_mut() {
            for thread in set.threads.drain(..) {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Msg(u32);

    #[test]
    fn sync_transport_returns_the_handler_error_directly() {
        let transport: SyncTransport<Msg> = SyncTransport::new();
        transport.subscribe("topic", Box::new(|_m| Err(DispatchError::Handler("boom".into()))));

        let result = transport.send("topic", Msg(1)).unwrap();
        assert!(matches!(result, Some(Err(DispatchError::Handler(_)))));
    }

    #[test]
    fn sync_transport_reports_handler_not_found() {
        let transport: SyncTransport<Msg> = SyncTransport::new();
        let err = transport.send("missing", Msg(1)).unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound(_)));
    }

    #[test]
    fn queued_transport_delivers_asynchronously_to_the_worker_pool() {
        let transport: InMemoryQueuedTransport<Msg> = InMemoryQueuedTransport::new(Some(2), 8);
        let received = Arc::new(AtomicUsize::new(0));
        let received_worker = Arc::clone(&received);
        transport.subscribe(
            "topic",
            Box::new(move |_m| {
                received_worker.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        transport.start();

        for i in 0..10 {
            transport.send("topic", Msg(i)).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.load(Ordering::SeqCst) < 10 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(received.load(Ordering::SeqCst), 10);
        transport.close();
    }
}
