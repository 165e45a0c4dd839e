//! Sequential saga execution with reverse-order compensation.
//!
//! A saga is an ordered list of steps, each dispatched through the
//! command bus in turn; if a later step fails, already-completed steps
//! are compensated in reverse order. State is persisted after every
//! transition so a crashed run can be resumed from where it left off.

use std::sync::Arc;

use escore_core::{Clock, SystemClock};
use escore_dispatch::CommandBus;
use escore_events::EventBus;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SagaError;
use crate::event::SagaEvent;
use crate::state::{SagaState, SagaStatus};
use crate::step::{SagaContext, SagaDefinition};
use crate::store::SagaStateStore;

pub struct SagaOrchestrator<B: EventBus<SagaEvent> + 'static> {
    command_bus: Arc<CommandBus>,
    state_store: Arc<dyn SagaStateStore>,
    bus: Option<Arc<B>>,
    clock: Arc<dyn Clock>,
}

impl<B: EventBus<SagaEvent> + 'static> SagaOrchestrator<B> {
    pub fn new(command_bus: Arc<CommandBus>, state_store: Arc<dyn SagaStateStore>) -> Self {
        Self {
            command_bus,
            state_store,
            bus: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<B>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn publish(&self, event: SagaEvent) {
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(event) {
                warn!(error = ?err, "failed to publish saga event");
            }
        }
    }

    fn persist(&self, state: &SagaState) -> Result<(), SagaError> {
        self.state_store.save(state)
    }

    /// Starts a new run of `definition`, executing every step in order.
    pub fn execute(&self, definition: &SagaDefinition, initial_data: std::collections::HashMap<String, serde_json::Value>) -> Result<SagaState, SagaError> {
        let saga_id = Uuid::now_v7();
        let mut state = SagaState::new(saga_id, definition.saga_type.clone(), initial_data.clone(), self.clock.now());
        state.status = SagaStatus::Running;
        self.persist(&state)?;

        let ctx = SagaContext::new(saga_id, initial_data);
        self.run_from(definition, &ctx, &mut state, 0)
    }

    /// Continues a persisted, in-flight saga from its `current_step_index`.
    /// Used to recover after a crash between step executions.
    pub fn resume(&self, definition: &SagaDefinition, saga_id: Uuid) -> Result<SagaState, SagaError> {
        let mut state = self.state_store.load(saga_id)?.ok_or(SagaError::NotFound(saga_id))?;
        if state.status.is_terminal() {
            return Err(SagaError::AlreadyTerminal { saga_id, status: state.status });
        }
        let ctx = SagaContext::new(saga_id, state.data.clone());
        let start = state.current_step_index;
        state.status = SagaStatus::Running;
        self.run_from(definition, &ctx, &mut state, start)
    }

    fn run_from(
        &self,
        definition: &SagaDefinition,
        ctx: &SagaContext,
        state: &mut SagaState,
        start_index: usize,
    ) -> Result<SagaState, SagaError> {
        for index in start_index..definition.steps.len() {
            let step = &definition.steps[index];
            let mut command = (step.command_factory)(ctx);

            match self.command_bus.dispatch(&mut command) {
                Ok(()) => {
                    if let Some(on_success) = &step.on_success {
                        on_success(ctx);
                    }
                    state.completed_steps.push(step.name.clone());
                    state.current_step_index = index + 1;
                    state.data = ctx.snapshot();
                    state.updated_at = self.clock.now();
                    self.persist(state)?;
                    self.publish(SagaEvent::StepCompleted {
                        saga_id: state.saga_id,
                        saga_type: state.saga_type.clone(),
                        step: step.name.clone(),
                        at: state.updated_at,
                    });
                    info!(saga_id = %state.saga_id, step = %step.name, "saga step completed");
                }
                Err(err) => {
                    if let Some(on_failure) = &step.on_failure {
                        on_failure(ctx);
                    }
                    let cause = err.to_string();
                    state.failed_step = Some(step.name.clone());
                    state.error = Some(cause.clone());
                    state.status = SagaStatus::Compensating;
                    state.updated_at = self.clock.now();
                    self.persist(state)?;
                    warn!(saga_id = %state.saga_id, step = %step.name, error = %cause, "saga step failed, compensating");

                    return self.compensate(definition, ctx, state, index, cause);
                }
            }
        }

        state.status = SagaStatus::Completed;
        state.updated_at = self.clock.now();
        self.persist(state)?;
        self.publish(SagaEvent::Completed {
            saga_id: state.saga_id,
            saga_type: state.saga_type.clone(),
            at: state.updated_at,
        });
        Ok(state.clone())
    }

    /// Dispatches compensations for every completed step that declared
    /// one, in reverse order.
    fn compensate(
        &self,
        definition: &SagaDefinition,
        ctx: &SagaContext,
        state: &mut SagaState,
        failed_index: usize,
        original_cause: String,
    ) -> Result<SagaState, SagaError> {
        let mut compensation_error: Option<String> = None;

        for index in (0..failed_index).rev() {
            let step = &definition.steps[index];
            let Some(compensation_factory) = &step.compensation_factory else {
                continue;
            };

            let mut command = compensation_factory(ctx);
            if let Err(err) = self.command_bus.dispatch(&mut command) {
                let cause = err.to_string();
                warn!(saga_id = %state.saga_id, step = %step.name, error = %cause, "saga compensation failed");
                compensation_error = Some(match compensation_error {
                    Some(existing) => format!("{existing}; {cause}"),
                    None => cause,
                });
            }
        }

        state.compensation_error = compensation_error.clone();
        state.updated_at = self.clock.now();

        match compensation_error {
            None => {
                state.status = SagaStatus::Compensated;
                self.persist(state)?;
                self.publish(SagaEvent::Compensated {
                    saga_id: state.saga_id,
                    saga_type: state.saga_type.clone(),
                    failed_step: state.failed_step.clone().unwrap_or_default(),
                    at: state.updated_at,
                });
                Ok(state.clone())
            }
            Some(compensation_cause) => {
                state.status = SagaStatus::Failed;
                self.persist(state)?;
                self.publish(SagaEvent::Failed {
                    saga_id: state.saga_id,
                    saga_type: state.saga_type.clone(),
                    failed_step: state.failed_step.clone().unwrap_or_default(),
                    error: original_cause.clone(),
                    compensation_error: Some(compensation_cause.clone()),
                    at: state.updated_at,
                });
                Err(SagaError::CompensationFailed {
                    step: state.failed_step.clone().unwrap_or_default(),
                    cause: original_cause,
                    compensation_cause,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::SagaStep;
    use crate::store::InMemorySagaStateStore;
    use chrono::Utc;
    use escore_core::AggregateId;
    use escore_dispatch::{CommandEnvelope, DispatchError};
    use escore_events::InMemoryEventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn command(command_type: &str) -> CommandEnvelope {
        CommandEnvelope::new(
            Uuid::now_v7(),
            command_type,
            AggregateId::new(1),
            "account",
            Utc::now(),
            Default::default(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn a_successful_saga_runs_every_step_in_order_and_completes() {
        let bus = Arc::new(CommandBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["debit", "credit"] {
            let order = Arc::clone(&order);
            let name_owned = name.to_string();
            bus.register(name, move |_cmd: &CommandEnvelope| {
                order.lock().unwrap().push(name_owned.clone());
                Ok(())
            });
        }

        let state_store = Arc::new(InMemorySagaStateStore::new());
        let orchestrator: SagaOrchestrator<InMemoryEventBus<SagaEvent>> = SagaOrchestrator::new(bus, state_store);

        let definition = SagaDefinition::new(
            "transfer",
            vec![
                SagaStep::new("debit", |_ctx| command("debit")).with_compensation(|_ctx| command("refund")),
                SagaStep::new("credit", |_ctx| command("credit")),
            ],
        );

        let result = orchestrator.execute(&definition, Default::default()).unwrap();
        assert_eq!(result.status, SagaStatus::Completed);
        assert_eq!(result.completed_steps, vec!["debit", "credit"]);
        assert_eq!(*order.lock().unwrap(), vec!["debit", "credit"]);
    }

    #[test]
    fn a_failing_step_triggers_reverse_order_compensation_and_lands_on_compensated() {
        let bus = Arc::new(CommandBus::new());
        let compensations = Arc::new(Mutex::new(Vec::new()));

        bus.register("debit", |_cmd: &CommandEnvelope| Ok(()));
        bus.register("credit", |_cmd: &CommandEnvelope| Err(DispatchError::Handler("insufficient funds".into())));
        {
            let compensations = Arc::clone(&compensations);
            bus.register("refund", move |_cmd: &CommandEnvelope| {
                compensations.lock().unwrap().push("refund".to_string());
                Ok(())
            });
        }

        let state_store = Arc::new(InMemorySagaStateStore::new());
        let orchestrator: SagaOrchestrator<InMemoryEventBus<SagaEvent>> = SagaOrchestrator::new(bus, state_store);

        let definition = SagaDefinition::new(
            "transfer",
            vec![
                SagaStep::new("debit", |_ctx| command("debit")).with_compensation(|_ctx| command("refund")),
                SagaStep::new("credit", |_ctx| command("credit")),
            ],
        );

        let err = orchestrator.execute(&definition, Default::default());
        // debit has a compensation and succeeds, credit has none, so the
        // saga compensates cleanly rather than failing outright.
        let state = match err {
            Ok(state) => state,
            Err(_) => panic!("expected a successfully compensated saga state"),
        };
        assert_eq!(state.status, SagaStatus::Compensated);
        assert_eq!(state.failed_step.as_deref(), Some("credit"));
        assert_eq!(*compensations.lock().unwrap(), vec!["refund"]);
    }

    #[test]
    fn a_failing_compensation_surfaces_a_combined_error_and_lands_on_failed() {
        let bus = Arc::new(CommandBus::new());
        bus.register("debit", |_cmd: &CommandEnvelope| Ok(()));
        bus.register("credit", |_cmd: &CommandEnvelope| Err(DispatchError::Handler("insufficient funds".into())));
        bus.register("refund", |_cmd: &CommandEnvelope| Err(DispatchError::Handler("refund unavailable".into())));

        let state_store = Arc::new(InMemorySagaStateStore::new());
        let orchestrator: SagaOrchestrator<InMemoryEventBus<SagaEvent>> = SagaOrchestrator::new(bus, state_store);

        let definition = SagaDefinition::new(
            "transfer",
            vec![
                SagaStep::new("debit", |_ctx| command("debit")).with_compensation(|_ctx| command("refund")),
                SagaStep::new("credit", |_ctx| command("credit")),
            ],
        );

        let err = orchestrator.execute(&definition, Default::default()).unwrap_err();
        assert!(matches!(err, SagaError::CompensationFailed { .. }));
    }

    #[test]
    fn resume_refuses_a_saga_that_has_already_reached_a_terminal_status() {
        let bus = Arc::new(CommandBus::new());
        bus.register("debit", |_cmd: &CommandEnvelope| Ok(()));
        bus.register("credit", |_cmd: &CommandEnvelope| Ok(()));

        let state_store = Arc::new(InMemorySagaStateStore::new());
        let orchestrator: SagaOrchestrator<InMemoryEventBus<SagaEvent>> = SagaOrchestrator::new(bus, state_store);

        let definition = SagaDefinition::new(
            "transfer",
            vec![SagaStep::new("debit", |_ctx| command("debit")), SagaStep::new("credit", |_ctx| command("credit"))],
        );

        let completed = orchestrator.execute(&definition, Default::default()).unwrap();
        assert_eq!(completed.status, SagaStatus::Completed);

        let err = orchestrator.resume(&definition, completed.saga_id).unwrap_err();
        assert!(matches!(
            err,
            SagaError::AlreadyTerminal { saga_id, status: SagaStatus::Completed } if saga_id == completed.saga_id
        ));
    }

    #[test]
    fn steps_later_in_the_list_can_read_data_an_earlier_step_wrote() {
        let bus = Arc::new(CommandBus::new());
        let seen_id = Arc::new(AtomicUsize::new(0));

        bus.register("create", |_cmd: &CommandEnvelope| Ok(()));
        {
            let seen_id = Arc::clone(&seen_id);
            bus.register("confirm", move |cmd: &CommandEnvelope| {
                seen_id.store(cmd.payload()["order_id"].as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
                Ok(())
            });
        }

        let state_store = Arc::new(InMemorySagaStateStore::new());
        let orchestrator: SagaOrchestrator<InMemoryEventBus<SagaEvent>> = SagaOrchestrator::new(bus, state_store);

        let definition = SagaDefinition::new(
            "order",
            vec![
                SagaStep::new("create", |_ctx| command("create")).with_on_success(|ctx| ctx.set("order_id", serde_json::json!(42))),
                SagaStep::new("confirm", |ctx| {
                    let order_id = ctx.get("order_id").unwrap_or(serde_json::json!(0));
                    CommandEnvelope::new(
                        Uuid::now_v7(),
                        "confirm",
                        AggregateId::new(1),
                        "order",
                        Utc::now(),
                        Default::default(),
                        serde_json::json!({ "order_id": order_id }),
                    )
                }),
            ],
        );

        orchestrator.execute(&definition, Default::default()).unwrap();
        assert_eq!(seen_id.load(Ordering::SeqCst), 42);
    }
}
