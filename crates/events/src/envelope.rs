use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use escore_core::AggregateId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Free-form key/value metadata carried alongside a committed event.
///
/// Conventional keys (not enforced by this crate): `correlation_id`,
/// `causation_id`, `actor_id`, `tenant_id`. Hosts that need tenant
/// isolation, request tracing, or actor attribution stash it here rather
/// than growing the envelope's field list — this keeps the envelope, and
/// everything that stores or transports it, agnostic to any one host's
/// cross-cutting concerns.
pub type Metadata = BTreeMap<String, JsonValue>;

/// Envelope for a committed event: the event payload plus the stream
/// position and metadata needed to store, order, and replay it.
///
/// This is the unit of persistence and the unit published on the event
/// bus. Domain code produces bare events (`Aggregate::handle` returns
/// `Vec<Self::Event>`); the store wraps each one in an envelope at commit
/// time, assigning `sequence_number` from the stream's current length.
///
/// Serializes to the wire-compatibility form mandated for the outbox's
/// default JSON envelope: `{id, type, timestamp, metadata, payload,
/// aggregate_id, aggregate_type, version}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    #[serde(rename = "id")]
    event_id: Uuid,
    #[serde(rename = "type")]
    event_type: String,
    aggregate_id: AggregateId,
    aggregate_type: String,
    /// Monotonically increasing position in the aggregate's stream,
    /// starting at 1.
    #[serde(rename = "version")]
    sequence_number: u64,
    #[serde(rename = "timestamp")]
    occurred_at: DateTime<Utc>,
    metadata: Metadata,
    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        metadata: Metadata,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            occurred_at,
            metadata,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_get(&self, key: &str) -> Option<&JsonValue> {
        self.metadata.get(key)
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap the payload, keeping every other field (used by projection
    /// replay and bus adapters that deserialize the JSON payload into a
    /// typed event).
    pub fn map_payload<F, E2>(self, f: F) -> EventEnvelope<E2>
    where
        F: FnOnce(E) -> E2,
    {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            sequence_number: self.sequence_number,
            occurred_at: self.occurred_at,
            metadata: self.metadata,
            payload: f(self.payload),
        }
    }
}
