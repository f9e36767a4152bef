use serde::Deserialize;
use serde_json::{json, Value};

use crate::actor::{parse_payload, Actor, ActorContext};
use crate::error::{HoldfastError, Result};
use crate::review::{self, GateCommand};
use crate::types::ActorKey;

pub(super) const KIND: &str = "approval";

/// Structured table receiving the data each completed review resumed with.
pub const DECISIONS_TABLE: &str = "decisions";

pub(super) fn create(_key: &ActorKey) -> Box<dyn Actor> {
    Box::new(ApprovalActor)
}

/// Holds submitted data until a reviewer proceeds, overrides or aborts.
pub struct ApprovalActor;

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    data: Value,
}

impl Actor for ApprovalActor {
    fn handle_call(
        &mut self,
        ctx: &mut ActorContext<'_>,
        method: &str,
        payload: Value,
    ) -> Result<Value> {
        match method {
            "submit" => {
                let req: SubmitRequest = parse_payload(payload)?;
                Ok(serde_json::to_value(review::request_review(ctx, req.data)?)?)
            }
            "session" => Ok(json!({
                "session": review::session(ctx)?,
                "decisions": ctx.rows(DECISIONS_TABLE)?,
            })),
            _ => Err(HoldfastError::UnknownMethod {
                kind: KIND.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn handle_message(&mut self, ctx: &mut ActorContext<'_>, message: Value) -> Result<()> {
        let command: GateCommand = parse_payload(message)?;
        review::decide(ctx, command, |ctx, data| {
            ctx.append(DECISIONS_TABLE, json!({ "data": data }))?;
            Ok(())
        })?;
        Ok(())
    }
}
