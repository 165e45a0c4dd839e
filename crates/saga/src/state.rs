use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// `(saga id, saga type, status, current step index, completed step names,
/// failed step name, error text, custom data map, created/updated
/// timestamps)`, matching the persisted saga-state layout.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SagaState {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub status: SagaStatus,
    pub current_step_index: usize,
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub compensation_error: Option<String>,
    pub data: HashMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    pub fn new(saga_id: Uuid, saga_type: impl Into<String>, data: HashMap<String, JsonValue>, now: DateTime<Utc>) -> Self {
        Self {
            saga_id,
            saga_type: saga_type.into(),
            status: SagaStatus::Pending,
            current_step_index: 0,
            completed_steps: Vec::new(),
            failed_step: None,
            error: None,
            compensation_error: None,
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    /// True for statuses a saga never leaves once reached: `resume` refuses
    /// to restart a saga already in one of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated)
    }
}
