use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::SagaError;
use crate::state::{SagaState, SagaStatus};

/// Durable persistence for saga state, enabling resume after a crash.
///
/// Grounded on `infra::saga::SagaRepository`, generalized from
/// event-store-backed append semantics to direct state read/write, since
/// the orchestrator owns one current state per saga rather than a stream
/// of saga events to fold.
pub trait SagaStateStore: Send + Sync {
    fn save(&self, state: &SagaState) -> Result<(), SagaError>;
    fn load(&self, saga_id: Uuid) -> Result<Option<SagaState>, SagaError>;
    fn list_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>, SagaError>;
}

#[derive(Default)]
pub struct InMemorySagaStateStore {
    states: RwLock<HashMap<Uuid, SagaState>>,
}

impl InMemorySagaStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SagaStateStore for InMemorySagaStateStore {
    fn save(&self, state: &SagaState) -> Result<(), SagaError> {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.saga_id, state.clone());
        Ok(())
    }

    fn load(&self, saga_id: Uuid) -> Result<Option<SagaState>, SagaError> {
        Ok(self.states.read().unwrap_or_else(|e| e.into_inner()).get(&saga_id).cloned())
    }

    fn list_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>, SagaError> {
        Ok(self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|state| state.status == status)
            .cloned()
            .collect())
    }
}
