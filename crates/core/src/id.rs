//! Aggregate identity.
//!
//! An aggregate's identifier is a 64-bit integer, not a UUID: identifier
//! generation (snowflake-style or otherwise) is an external collaborator's
//! job, out of scope for the core (see the workspace's external-interfaces
//! notes). The core only needs the id to be `Copy + Eq + Hash + Ord` so it
//! can key streams and route commands.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an aggregate root. Paired with an aggregate type tag
/// (a short string, carried alongside it rather than encoded into it),
/// this names an event stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(u64);

impl AggregateId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for AggregateId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<AggregateId> for u64 {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

impl FromStr for AggregateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .parse::<u64>()
            .map_err(|e| DomainError::invalid_id(format!("AggregateId: {e}")))?;
        Ok(Self(value))
    }
}
