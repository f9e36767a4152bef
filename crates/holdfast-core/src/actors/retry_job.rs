use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::actor::{parse_payload, Actor, ActorContext};
use crate::channel::ChannelMessage;
use crate::config::RetryConfig;
use crate::error::{HoldfastError, Result};
use crate::retry::{RetryOutcome, RetryPayload, RetryableTask, RETRY_LOG_TABLE};
use crate::types::ActorKey;

pub(super) const KIND: &str = "retry";
const ATTEMPT_TASK: &str = "attempt";
const JOB_SLOT: &str = "job";

pub(super) fn create(_key: &ActorKey) -> Box<dyn Actor> {
    Box::new(RetryJobActor)
}

/// A job whose action fails for its first `fail_for` attempts.
pub struct RetryJobActor;

#[derive(Debug, Deserialize)]
struct StartRequest {
    fail_for: u32,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    base_delay_seconds: Option<u64>,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JobState {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attempts_run: u32,
    #[serde(default)]
    last_outcome: Option<RetryOutcome>,
}

impl RetryJobActor {
    fn start(&self, ctx: &mut ActorContext<'_>, payload: Value) -> Result<Value> {
        let req: StartRequest = parse_payload(payload)?;
        let defaults = &ctx.config().retry;
        let policy = RetryConfig {
            max_attempts: req.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_seconds: req.base_delay_seconds.unwrap_or(defaults.base_delay_seconds),
        };
        let first = RetryPayload::first(
            json!({ "fail_for": req.fail_for, "label": req.label }),
            &policy,
        );
        let task_id = RetryableTask::new(ATTEMPT_TASK).start(ctx, &first)?;

        let job = JobState {
            label: req.label,
            started_at: Some(ctx.now()),
            attempts_run: 0,
            last_outcome: None,
        };
        ctx.commit(JOB_SLOT, job)?;
        Ok(json!({ "task_id": task_id, "max_attempts": policy.max_attempts }))
    }

    fn status(&self, ctx: &ActorContext<'_>) -> Result<Value> {
        let job: JobState = ctx.load(JOB_SLOT)?;
        let aborted = ctx.rows(RETRY_LOG_TABLE)?;
        Ok(json!({ "job": job, "retry_log": aborted }))
    }
}

impl Actor for RetryJobActor {
    fn handle_call(
        &mut self,
        ctx: &mut ActorContext<'_>,
        method: &str,
        payload: Value,
    ) -> Result<Value> {
        match method {
            "start" => self.start(ctx, payload),
            "status" => self.status(ctx),
            _ => Err(HoldfastError::UnknownMethod {
                kind: KIND.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn handle_task(&mut self, ctx: &mut ActorContext<'_>, method: &str, payload: Value) -> Result<()> {
        if method != ATTEMPT_TASK {
            return Err(HoldfastError::UnknownMethod {
                kind: KIND.to_string(),
                method: method.to_string(),
            });
        }
        let payload: RetryPayload = parse_payload(payload)?;
        let fail_for = payload
            .business_payload
            .get("fail_for")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let outcome = RetryableTask::new(ATTEMPT_TASK).run(ctx, &payload, |_, p| {
            if u64::from(p.attempt_count) < fail_for {
                anyhow::bail!("simulated failure on attempt {}", p.attempt_count);
            }
            Ok(())
        })?;

        let job = ctx.update(JOB_SLOT, move |job: Option<JobState>| {
            let mut job = job.unwrap_or_default();
            job.attempts_run = job.attempts_run.saturating_add(1);
            job.last_outcome = Some(outcome);
            Ok(job)
        })?;
        let state = serde_json::to_value(&job)?;
        ctx.broadcast(ChannelMessage::StateUpdate { state });
        Ok(())
    }
}
