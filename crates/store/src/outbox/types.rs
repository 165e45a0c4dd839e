use chrono::{DateTime, Utc};
use escore_events::EventEnvelope;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Backoff shape used to compute `next_attempt_at` after a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy applied by the dispatcher when a publish attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: std::time::Duration,
    pub max_delay: std::time::Duration,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: std::time::Duration::from_millis(200),
            max_delay: std::time::Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt numbered `attempt` (1-based). Jitter is a
    /// deterministic function of the attempt number rather than a call to
    /// a random source, so retry timing stays reproducible in tests.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms * attempt as f64,
            BackoffStrategy::Exponential => base_ms * 2f64.powi(attempt.saturating_sub(1) as i32),
        };

        let jittered_ms = if self.jitter {
            let jitter_fraction = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            raw_ms * (0.5 + jitter_fraction / 2.0)
        } else {
            raw_ms
        };

        let capped_ms = jittered_ms.min(self.max_delay.as_millis() as f64);
        std::time::Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Status of a pending event publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Published,
    /// Exhausted `max_attempts`; surfaced via `list_by_status`, never
    /// retried automatically.
    Failed,
}

/// A single pending event publish, written atomically alongside the event
/// it wraps.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub envelope: EventEnvelope<JsonValue>,
    pub target_topic: String,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn pending(envelope: EventEnvelope<JsonValue>, target_topic: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            envelope,
            target_topic,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
            published_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);
        let d3 = policy.delay_for_attempt(3);
        assert!(d2 > d1);
        assert!(d3 > d2);
        assert!(policy.delay_for_attempt(20) <= policy.max_delay);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
