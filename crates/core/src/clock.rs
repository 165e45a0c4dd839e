//! Injectable time source.
//!
//! Event timestamps, outbox scheduling, and saga timeouts all read the
//! current time through this trait rather than calling `Utc::now()`
//! directly, so tests can supply a fixed or controllable clock.

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
