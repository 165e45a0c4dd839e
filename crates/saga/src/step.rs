use std::collections::HashMap;
use std::sync::RwLock;

use escore_dispatch::CommandEnvelope;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Per-execution scratch space handed to every step's factories and
/// callbacks: the saga's identity plus a mutable data bag so a later
/// step's command can depend on an earlier step's result (e.g. an order
/// id minted by step one, consumed by step two).
pub struct SagaContext {
    pub saga_id: Uuid,
    data: RwLock<HashMap<String, JsonValue>>,
}

impl SagaContext {
    pub fn new(saga_id: Uuid, initial_data: HashMap<String, JsonValue>) -> Self {
        Self {
            saga_id,
            data: RwLock::new(initial_data),
        }
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: JsonValue) {
        self.data.write().unwrap_or_else(|e| e.into_inner()).insert(key.into(), value);
    }

    pub fn snapshot(&self) -> HashMap<String, JsonValue> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

type CommandFactory = dyn Fn(&SagaContext) -> CommandEnvelope + Send + Sync;
type StepCallback = dyn Fn(&SagaContext) + Send + Sync;

/// One step of a saga: a forward command, an optional compensating
/// command, and optional success/failure callbacks for side effects that
/// don't belong in either command (e.g. stashing a result into the
/// context for a later step).
pub struct SagaStep {
    pub name: String,
    pub command_factory: Box<CommandFactory>,
    pub compensation_factory: Option<Box<CommandFactory>>,
    pub on_success: Option<Box<StepCallback>>,
    pub on_failure: Option<Box<StepCallback>>,
}

impl SagaStep {
    pub fn new(name: impl Into<String>, command_factory: impl Fn(&SagaContext) -> CommandEnvelope + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            command_factory: Box::new(command_factory),
            compensation_factory: None,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_compensation(mut self, compensation_factory: impl Fn(&SagaContext) -> CommandEnvelope + Send + Sync + 'static) -> Self {
        self.compensation_factory = Some(Box::new(compensation_factory));
        self
    }

    pub fn with_on_success(mut self, callback: impl Fn(&SagaContext) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn with_on_failure(mut self, callback: impl Fn(&SagaContext) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }
}

/// An ordered list of steps sharing one saga type name.
pub struct SagaDefinition {
    pub saga_type: String,
    pub steps: Vec<SagaStep>,
}

impl SagaDefinition {
    pub fn new(saga_type: impl Into<String>, steps: Vec<SagaStep>) -> Self {
        Self {
            saga_type: saga_type.into(),
            steps,
        }
    }
}
