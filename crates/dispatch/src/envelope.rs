use chrono::{DateTime, Utc};
use escore_core::AggregateId;
use escore_events::{Command, Metadata};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Wire-erased command envelope: `(id, type, aggregate_id, aggregate_type,
/// metadata, payload)`. This is what actually travels through the
/// middleware pipeline and the transport; typed `Command` values are
/// erased to JSON at the boundary the same way `EventEnvelope` erases
/// typed events.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CommandEnvelope {
    command_id: Uuid,
    command_type: String,
    aggregate_id: AggregateId,
    aggregate_type: String,
    issued_at: DateTime<Utc>,
    metadata: Metadata,
    payload: JsonValue,
}

impl CommandEnvelope {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        command_id: Uuid,
        command_type: impl Into<String>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        issued_at: DateTime<Utc>,
        metadata: Metadata,
        payload: JsonValue,
    ) -> Self {
        Self {
            command_id,
            command_type: command_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            issued_at,
            metadata,
            payload,
        }
    }

    /// Erases a typed command, tagging it with `command_type` and
    /// `aggregate_type`. Mirrors `UncommittedEvent::from_typed`.
    pub fn from_typed<C>(
        command_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        command: &C,
        metadata: Metadata,
    ) -> Result<Self, serde_json::Error>
    where
        C: Command + serde::Serialize,
    {
        Ok(Self {
            command_id: Uuid::now_v7(),
            command_type: command_type.into(),
            aggregate_id: command.target_aggregate_id(),
            aggregate_type: aggregate_type.into(),
            issued_at: Utc::now(),
            metadata,
            payload: serde_json::to_value(command)?,
        })
    }

    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Decodes the payload into a typed command.
    pub fn decode<C: serde::de::DeserializeOwned>(&self) -> Result<C, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
