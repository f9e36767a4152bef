//! At most one outstanding deferred task per actor.
//!
//! The outstanding id lives in the actor's own state, so it survives a
//! restart. It is cleared by a successful cancel or by the task firing;
//! a cancel that arrives too late leaves it in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::actor::ActorContext;
use crate::error::{HoldfastError, Result};

pub const SLOT: &str = "_single_flight";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingleFlightState {
    pub outstanding_task_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub task_id: Uuid,
    pub cancelled: bool,
}

pub fn state(ctx: &ActorContext<'_>) -> Result<SingleFlightState> {
    ctx.load(SLOT)
}

/// Schedule `method` unless a follow-up is already outstanding.
pub fn schedule_follow_up(
    ctx: &mut ActorContext<'_>,
    delay_seconds: u64,
    method: &str,
    payload: Value,
) -> Result<Uuid> {
    if let Some(task_id) = state(ctx)?.outstanding_task_id {
        return Err(HoldfastError::Conflict {
            actor: ctx.key().to_string(),
            task_id,
        });
    }
    let task_id = ctx.schedule(delay_seconds, method, payload)?;
    ctx.commit(
        SLOT,
        SingleFlightState {
            outstanding_task_id: Some(task_id),
        },
    )?;
    Ok(task_id)
}

/// Cancel the outstanding follow-up.
///
/// If the scheduler reports the task already fired, the id is kept and
/// `cancelled` is `false`.
pub fn cancel_follow_up(ctx: &mut ActorContext<'_>) -> Result<CancelOutcome> {
    let task_id = state(ctx)?.outstanding_task_id.ok_or_else(|| {
        HoldfastError::NotFound(format!("no outstanding follow-up on '{}'", ctx.key()))
    })?;

    let cancelled = ctx.cancel(task_id)?;
    if cancelled {
        ctx.commit(SLOT, SingleFlightState::default())?;
    } else {
        tracing::debug!(actor = %ctx.key(), task = %task_id, "follow-up already fired; keeping id");
    }
    Ok(CancelOutcome { task_id, cancelled })
}

/// Clear the outstanding id. Called first thing when the follow-up fires.
pub fn on_fire(ctx: &mut ActorContext<'_>) -> Result<()> {
    ctx.commit(SLOT, SingleFlightState::default())
}
