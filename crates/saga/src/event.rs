use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle events a saga publishes as it runs. Consumers (dashboards,
/// other projections) may subscribe to these without touching the saga
/// state store directly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SagaEvent {
    StepCompleted {
        saga_id: Uuid,
        saga_type: String,
        step: String,
        at: DateTime<Utc>,
    },
    Completed {
        saga_id: Uuid,
        saga_type: String,
        at: DateTime<Utc>,
    },
    Compensated {
        saga_id: Uuid,
        saga_type: String,
        failed_step: String,
        at: DateTime<Utc>,
    },
    Failed {
        saga_id: Uuid,
        saga_type: String,
        failed_step: String,
        error: String,
        compensation_error: Option<String>,
        at: DateTime<Utc>,
    },
}
