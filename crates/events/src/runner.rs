//! Projection runner utilities (pure read-model builders).
//!
//! Read models are disposable; events are the source of truth. This module
//! provides deterministic replay and per-stream cursor tracking without
//! making any storage assumptions — `ProjectionManager` (in the
//! projections crate) is what actually schedules and persists this.

use std::collections::HashMap;

use escore_core::AggregateId;

use crate::{EventEnvelope, Projection};

/// Tracks, per aggregate stream, the last sequence number a projection has
/// applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionCursor {
    positions: HashMap<AggregateId, u64>,
}

impl ProjectionCursor {
    pub fn last_sequence_number(&self, aggregate_id: AggregateId) -> u64 {
        self.positions.get(&aggregate_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    #[error("non-monotonic sequence for stream: last applied {last}, found {found}")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Runs envelopes through a projection and tracks per-stream progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: ProjectionCursor,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: ProjectionCursor::default(),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut P {
        &mut self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    pub fn cursor(&self) -> &ProjectionCursor {
        &self.cursor
    }

    /// Applies a single envelope, rejecting it if its stream's sequence
    /// number does not strictly increase.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<(), ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let found = envelope.sequence_number();
        let last = self.cursor.last_sequence_number(aggregate_id);

        if found <= last {
            return Err(ProjectionError::NonMonotonicSequence { last, found });
        }

        self.projection.apply(envelope);
        self.cursor.positions.insert(aggregate_id, found);
        Ok(())
    }

    /// Applies many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ProjectionError>
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env)?;
        }
        Ok(())
    }

    /// Rebuilds a projection from scratch by replaying the full event
    /// history. The factory creates a fresh projection instance.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, ProjectionCursor), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}
