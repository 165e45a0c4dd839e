use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("no saga state found for '{0}'")]
    NotFound(Uuid),

    #[error("saga step '{step}' failed: {cause}")]
    StepFailed { step: String, cause: String },

    /// A step failed and at least one compensation for a previously
    /// completed step also failed. Both causes are preserved; the saga
    /// transitions to `failed` rather than `compensated`.
    #[error("saga step '{step}' failed ({cause}); compensation also failed: {compensation_cause}")]
    CompensationFailed {
        step: String,
        cause: String,
        compensation_cause: String,
    },

    #[error("saga state store failure: {0}")]
    StateStoreFailure(String),

    #[error("saga '{saga_id}' is already terminal ({status:?}); cannot resume")]
    AlreadyTerminal { saga_id: Uuid, status: crate::state::SagaStatus },
}
