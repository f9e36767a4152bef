use serde::Deserialize;
use serde_json::{json, Value};

use crate::actor::{parse_payload, Actor, ActorContext};
use crate::error::{HoldfastError, Result};
use crate::single_flight;
use crate::types::ActorKey;

pub(super) const KIND: &str = "follow_up";
const FOLLOW_UP_TASK: &str = "follow_up";

/// Structured table receiving one row per fired follow-up.
pub const FOLLOW_UPS_TABLE: &str = "follow_ups";

pub(super) fn create(_key: &ActorKey) -> Box<dyn Actor> {
    Box::new(FollowUpActor)
}

/// Schedules one reminder at a time and records it when it fires.
pub struct FollowUpActor;

#[derive(Debug, Deserialize)]
struct ScheduleRequest {
    delay_seconds: u64,
    #[serde(default)]
    note: String,
}

impl Actor for FollowUpActor {
    fn handle_call(
        &mut self,
        ctx: &mut ActorContext<'_>,
        method: &str,
        payload: Value,
    ) -> Result<Value> {
        match method {
            "schedule" => {
                let req: ScheduleRequest = parse_payload(payload)?;
                let task_id = single_flight::schedule_follow_up(
                    ctx,
                    req.delay_seconds,
                    FOLLOW_UP_TASK,
                    json!({ "note": req.note }),
                )?;
                Ok(json!({ "task_id": task_id }))
            }
            "cancel" => Ok(serde_json::to_value(single_flight::cancel_follow_up(ctx)?)?),
            "status" => Ok(json!({
                "single_flight": single_flight::state(ctx)?,
                "follow_ups": ctx.rows(FOLLOW_UPS_TABLE)?,
            })),
            _ => Err(HoldfastError::UnknownMethod {
                kind: KIND.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn handle_task(&mut self, ctx: &mut ActorContext<'_>, method: &str, payload: Value) -> Result<()> {
        if method != FOLLOW_UP_TASK {
            return Err(HoldfastError::UnknownMethod {
                kind: KIND.to_string(),
                method: method.to_string(),
            });
        }
        single_flight::on_fire(ctx)?;
        let note = payload.get("note").cloned().unwrap_or(Value::Null);
        ctx.append(FOLLOW_UPS_TABLE, json!({ "note": note }))?;
        tracing::info!(actor = %ctx.key(), "follow-up fired");
        Ok(())
    }
}
