use escore_core::AggregateId;

/// A command represents intent: a request to perform an action on an
/// aggregate. Commands are transient (never persisted) and are validated
/// into events by `Aggregate::handle`.
///
/// ## Command vs Event
///
/// - **Command**: intent to do something (e.g. "withdraw 10 from account").
/// - **Event**: fact that something happened (e.g. "Withdrawn { amount: 10
///   }"). Commands are rejected if invalid; events represent accepted
///   changes and are never rejected after the fact.
///
/// ## Aggregate targeting
///
/// Every command names the aggregate it targets via
/// `target_aggregate_id()`. This is how the command bus and the aggregate
/// runtime route a command to the right stream, and how they ensure a
/// single command touches exactly one aggregate.
///
/// ## Design constraints
///
/// Commands must be `Clone` (retries, logging), `Send + Sync + 'static`
/// (they cross thread boundaries in worker pools and transports).
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
