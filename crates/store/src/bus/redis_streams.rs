//! Redis Streams-backed event bus: durable, at-least-once delivery via
//! consumer groups, with a dead-letter queue for exhausted retries.
//!
//! Stream key holds every event; one consumer group per distinct consumer
//! (e.g. a projection or a saga listener), with named consumers within a
//! group for horizontal scale-out. Uses the synchronous `redis::Connection`
//! API rather than the async client, consistent with the rest of this
//! crate's thread-based concurrency model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use escore_events::{EventBus, EventEnvelope, Subscription};
use serde_json::Value as JsonValue;
use tracing::{error, instrument, warn};

const DEFAULT_STREAM_KEY: &str = "escore:events";
const DEFAULT_DLQ_KEY: &str = "escore:events:dlq";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    max_retries: u32,
    pending_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("redis connection error: {0}")]
    Connection(String),
    #[error("redis command error: {0}")]
    Command(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl RedisStreamsEventBus {
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        dlq_key: Option<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            dlq_key: dlq_key.unwrap_or_else(|| DEFAULT_DLQ_KEY.to_string()),
            max_retries: DEFAULT_MAX_RETRIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Idempotent: creates the consumer group (and the stream, if missing).
    pub fn ensure_consumer_group(&self, group_name: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        Ok(())
    }

    #[instrument(
        skip(self, message),
        fields(stream_key = %self.stream_key, aggregate_id = %message.aggregate_id()),
        err
    )]
    fn publish_sync(&self, message: EventEnvelope<JsonValue>) -> Result<(), RedisStreamsError> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("aggregate_id")
            .arg(message.aggregate_id().to_string())
            .arg("aggregate_type")
            .arg(message.aggregate_type())
            .arg("sequence_number")
            .arg(message.sequence_number().to_string())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn acknowledge_sync(&self, group_name: &str, message_ids: &[String]) -> Result<(), RedisStreamsError> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg(message_ids)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }

    fn send_to_dlq_sync(
        &self,
        message: &EventEnvelope<JsonValue>,
        original_message_id: &str,
        retry_count: u32,
    ) -> Result<(), RedisStreamsError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(&self.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(original_message_id)
            .arg("retry_count")
            .arg(retry_count.to_string())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        warn!(message_id = %original_message_id, retry_count, "event sent to dead-letter queue");
        Ok(())
    }

    fn read_group_sync(
        &self,
        group_name: &str,
        consumer_name: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>, RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let pending = self.read_pending_sync(&mut conn, group_name, consumer_name, count)?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        self.read_new_sync(&mut conn, group_name, consumer_name, count, block_ms)
    }

    fn read_pending_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, RedisStreamsError> {
        let pending_info: redis::RedisResult<Vec<(String, String, u64, u64)>> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg("-")
            .arg("+")
            .arg(count.to_string())
            .arg(consumer_name)
            .query(conn);

        let pending_ids = match pending_info {
            Ok(entries) => entries.into_iter().map(|(id, ..)| id).collect::<Vec<_>>(),
            Err(_) => return Ok(vec![]),
        };
        if pending_ids.is_empty() {
            return Ok(vec![]);
        }

        let claimed: redis::RedisResult<Vec<redis::Value>> = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg(consumer_name)
            .arg(self.pending_timeout_ms.to_string())
            .arg(&pending_ids[..])
            .arg("RETRYCOUNT")
            .arg(self.max_retries.to_string())
            .query(conn);

        let claimed_entries = match claimed {
            Ok(entries) => entries,
            Err(_) => return Ok(vec![]),
        };

        Ok(claimed_entries
            .into_iter()
            .filter_map(|entry| self.parse_stream_entry(entry).ok())
            .collect())
    }

    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>, RedisStreamsError> {
        let result: redis::RedisResult<HashMap<String, Vec<redis::Value>>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group_name)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count.to_string())
            .arg("BLOCK")
            .arg(block_ms.to_string())
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(conn);

        let stream_data = match result {
            Ok(data) => data,
            Err(e) => {
                if e.kind() == redis::ErrorKind::TypeError && e.to_string().contains("timeout") {
                    return Ok(vec![]);
                }
                return Err(RedisStreamsError::Command(format!("XREADGROUP failed: {e}")));
            }
        };

        Ok(stream_data
            .get(&self.stream_key)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| self.parse_stream_entry(entry).ok())
            .collect())
    }

    fn parse_stream_entry(&self, entry: redis::Value) -> Result<StreamMessage, RedisStreamsError> {
        let entry_vec: Vec<redis::Value> = match entry {
            redis::Value::Bulk(v) => v,
            _ => return Err(RedisStreamsError::Deserialization("invalid entry format".into())),
        };
        if entry_vec.len() < 2 {
            return Err(RedisStreamsError::Deserialization("entry too short".into()));
        }

        let message_id = match &entry_vec[0] {
            redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
            _ => return Err(RedisStreamsError::Deserialization("invalid message id".into())),
        };

        let fields_vec: Vec<redis::Value> = match &entry_vec[1] {
            redis::Value::Bulk(v) => v.clone(),
            _ => return Err(RedisStreamsError::Deserialization("invalid fields format".into())),
        };

        let mut fields = HashMap::new();
        for chunk in fields_vec.chunks(2) {
            if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
                fields.insert(String::from_utf8_lossy(key).to_string(), String::from_utf8_lossy(value).to_string());
            }
        }

        let payload_str = fields
            .get("payload")
            .ok_or_else(|| RedisStreamsError::Deserialization("missing payload field".into()))?;
        let envelope: EventEnvelope<JsonValue> = serde_json::from_str(payload_str)
            .map_err(|e| RedisStreamsError::Deserialization(format!("envelope decode failed: {e}")))?;

        let retry_count = fields.get("retry_count").and_then(|s| s.parse().ok()).unwrap_or(0);

        Ok(StreamMessage {
            message_id,
            envelope,
            retry_count,
        })
    }

    /// Subscribes via a named consumer group, for production use where
    /// multiple consumer instances load-balance a group's work.
    pub fn subscribe_with_group(&self, group_name: &str, consumer_name: &str) -> Subscription<EventEnvelope<JsonValue>> {
        if let Err(e) = self.ensure_consumer_group(group_name) {
            error!("failed to create consumer group {group_name}: {e}");
        }

        let poller = RedisStreamsPoller {
            bus: Arc::new(self.clone()),
            group_name: group_name.to_string(),
            consumer_name: consumer_name.to_string(),
            unacked: Arc::new(Mutex::new(Vec::new())),
        };

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || loop {
            match poller.bus.read_group_sync(&poller.group_name, &poller.consumer_name, 10, 100) {
                Ok(messages) => {
                    let mut unacked = poller.unacked.lock().unwrap_or_else(|e| e.into_inner());
                    for msg in messages {
                        if msg.retry_count >= poller.bus.max_retries {
                            if let Err(e) = poller.bus.send_to_dlq_sync(&msg.envelope, &msg.message_id, msg.retry_count) {
                                error!("failed to send event to dlq: {e}");
                            }
                            let _ = poller.bus.acknowledge_sync(&poller.group_name, &[msg.message_id]);
                            continue;
                        }
                        if tx.send(msg.envelope).is_err() {
                            return;
                        }
                        unacked.push(msg.message_id);
                    }
                    if !unacked.is_empty() {
                        let to_ack = std::mem::take(&mut *unacked);
                        drop(unacked);
                        let _ = poller.bus.acknowledge_sync(&poller.group_name, &to_ack);
                    }
                }
                Err(e) => error!("failed to read from stream: {e}"),
            }
            std::thread::sleep(Duration::from_millis(100));
        });

        Subscription::new(rx)
    }
}

#[derive(Debug, Clone)]
struct StreamMessage {
    message_id: String,
    envelope: EventEnvelope<JsonValue>,
    retry_count: u32,
}

struct RedisStreamsPoller {
    bus: Arc<RedisStreamsEventBus>,
    group_name: String,
    consumer_name: String,
    unacked: Arc<Mutex<Vec<String>>>,
}

impl EventBus<EventEnvelope<JsonValue>> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        self.publish_sync(message)
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.subscribe_with_group("default", &format!("consumer-{}", uuid::Uuid::now_v7()))
    }
}
