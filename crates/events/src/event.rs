use chrono::{DateTime, Utc};

/// A domain event: a fact that already happened, emitted by an aggregate's
/// `handle` and folded back into state by its `apply`.
///
/// Events are immutable, versioned, and append-only. State is rebuilt by
/// replaying them in order, which is what makes the audit trail, time
/// travel, and independent read models all fall out of the same log.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. `"account.withdrawn"`). Used for routing,
    /// filtering, and schema registry lookups. Never change it once events
    /// of this type exist in a stream.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type. Starts at 1 and only
    /// increases; bump it when the payload shape changes and keep the
    /// deserializer able to read older versions until they're migrated.
    fn version(&self) -> u32;

    /// When the event occurred in business/domain time, as opposed to the
    /// time it was persisted (which the store stamps separately).
    fn occurred_at(&self) -> DateTime<Utc>;
}
