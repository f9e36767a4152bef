//! Self-rescheduling work with bounded exponential backoff.
//!
//! Each attempt runs as its own scheduled task. A failed attempt either
//! schedules the next one through the durable scheduler or, once the attempt
//! limit is passed, ends the chain with a `TaskAborted` event. Business
//! errors never escape `RetryableTask::run`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::actor::ActorContext;
use crate::config::RetryConfig;
use crate::error::{HoldfastError, Result};

/// Structured table receiving one row per aborted chain.
pub const RETRY_LOG_TABLE: &str = "retry_log";

// ---------------------------------------------------------------------------
// RetryPayload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPayload {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
    #[serde(default)]
    pub business_payload: Value,
}

impl RetryPayload {
    /// Payload for the first attempt of a new chain.
    pub fn first(business_payload: Value, policy: &RetryConfig) -> Self {
        Self {
            attempt_count: 0,
            max_attempts: policy.max_attempts,
            base_delay_seconds: policy.base_delay_seconds,
            business_payload,
        }
    }

    /// Payload for the following attempt; everything but the count is kept.
    pub fn next(&self) -> Self {
        Self {
            attempt_count: self.attempt_count.saturating_add(1),
            ..self.clone()
        }
    }
}

/// `2^next_attempt * base_seconds`, saturating at `u64::MAX`.
pub fn backoff_delay(next_attempt: u32, base_seconds: u64) -> u64 {
    2u64.checked_pow(next_attempt)
        .and_then(|factor| factor.checked_mul(base_seconds))
        .unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// RetryOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    Succeeded {
        attempt: u32,
    },
    WillRetry {
        next_attempt: u32,
        delay_seconds: u64,
        task_id: Uuid,
    },
    Aborted {
        attempt_count: u32,
    },
}

// ---------------------------------------------------------------------------
// RetryableTask
// ---------------------------------------------------------------------------

/// A retry chain bound to one scheduled handler name on the current actor.
#[derive(Debug, Clone, Copy)]
pub struct RetryableTask<'m> {
    pub method: &'m str,
}

impl<'m> RetryableTask<'m> {
    pub fn new(method: &'m str) -> Self {
        Self { method }
    }

    /// Schedule the first attempt to run on the next tick.
    pub fn start(&self, ctx: &mut ActorContext<'_>, payload: &RetryPayload) -> Result<Uuid> {
        ctx.schedule(0, self.method, serde_json::to_value(payload)?)
    }

    /// Run one attempt of `action` and decide what happens next.
    ///
    /// Only scheduler or store failures are returned as `Err`; a failing
    /// action is always turned into `WillRetry` or `Aborted`.
    pub fn run<F>(
        &self,
        ctx: &mut ActorContext<'_>,
        payload: &RetryPayload,
        action: F,
    ) -> Result<RetryOutcome>
    where
        F: FnOnce(&mut ActorContext<'_>, &RetryPayload) -> anyhow::Result<()>,
    {
        let err = match action(ctx, payload) {
            Ok(()) => {
                tracing::debug!(actor = %ctx.key(), method = self.method, attempt = payload.attempt_count, "retryable task succeeded");
                return Ok(RetryOutcome::Succeeded {
                    attempt: payload.attempt_count,
                });
            }
            Err(e) => e,
        };

        let next = payload.next();
        if next.attempt_count > payload.max_attempts {
            let aborted = HoldfastError::TaskAborted {
                actor: ctx.key().to_string(),
                method: self.method.to_string(),
                attempt_count: payload.attempt_count,
            };
            tracing::warn!(error = %aborted, last_error = %format!("{err:#}"), "retry limit reached");
            ctx.append(
                RETRY_LOG_TABLE,
                json!({
                    "method": self.method,
                    "attempt_count": payload.attempt_count,
                    "max_attempts": payload.max_attempts,
                    "error": format!("{err:#}"),
                    "business_payload": payload.business_payload,
                }),
            )?;
            return Ok(RetryOutcome::Aborted {
                attempt_count: payload.attempt_count,
            });
        }

        let delay_seconds = backoff_delay(next.attempt_count, next.base_delay_seconds);
        let task_id = ctx.schedule(delay_seconds, self.method, serde_json::to_value(&next)?)?;
        tracing::debug!(
            actor = %ctx.key(),
            method = self.method,
            next_attempt = next.attempt_count,
            delay_seconds,
            error = %format!("{err:#}"),
            "attempt failed, retry scheduled"
        );
        Ok(RetryOutcome::WillRetry {
            next_attempt: next.attempt_count,
            delay_seconds,
            task_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use chrono::Duration;

    const METHOD: &str = "attempt";

    fn policy(max_attempts: u32, base: u64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_seconds: base,
        }
    }

    /// Fire every due task in order, feeding each one back through `run`.
    fn drive(fx: &Fixture, fail_for: u32) -> Vec<RetryOutcome> {
        let task = RetryableTask::new(METHOD);
        let mut outcomes = Vec::new();
        let mut now = chrono::Utc::now();
        loop {
            let due = fx.tasks.range_due(now + Duration::days(365)).unwrap();
            let Some(next) = due.into_iter().next() else {
                break;
            };
            now = next.not_before;
            fx.tasks
                .set_status(next.id, crate::scheduler::TaskStatus::Completed)
                .unwrap();
            let payload: RetryPayload = serde_json::from_value(next.payload).unwrap();
            let mut ctx = fx.ctx_at(now);
            let outcome = task
                .run(&mut ctx, &payload, |_, p| {
                    if p.attempt_count < fail_for {
                        anyhow::bail!("upstream unavailable")
                    }
                    Ok(())
                })
                .unwrap();
            outcomes.push(outcome);
        }
        outcomes
    }

    #[test]
    fn backoff_doubles_from_base() {
        let delays: Vec<u64> = (1..=5).map(|n| backoff_delay(n, 10)).collect();
        assert_eq!(delays, vec![20, 40, 80, 160, 320]);
    }

    #[test]
    fn backoff_saturates() {
        assert_eq!(backoff_delay(64, 10), u64::MAX);
        assert_eq!(backoff_delay(40, u64::MAX / 2), u64::MAX);
    }

    #[test]
    fn next_only_bumps_attempt_count() {
        let p = RetryPayload::first(json!({"order": 7}), &policy(5, 10));
        let n = p.next();
        assert_eq!(n.attempt_count, 1);
        assert_eq!(n.max_attempts, 5);
        assert_eq!(n.base_delay_seconds, 10);
        assert_eq!(n.business_payload, json!({"order": 7}));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let fx = Fixture::new("retry", "job-1");
        let payload = RetryPayload::first(json!({}), &policy(5, 10));
        RetryableTask::new(METHOD)
            .start(&mut fx.ctx(), &payload)
            .unwrap();

        let outcomes = drive(&fx, 2);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(
            outcomes[0],
            RetryOutcome::WillRetry { next_attempt: 1, delay_seconds: 20, .. }
        ));
        assert!(matches!(
            outcomes[1],
            RetryOutcome::WillRetry { next_attempt: 2, delay_seconds: 40, .. }
        ));
        assert_eq!(outcomes[2], RetryOutcome::Succeeded { attempt: 2 });
        assert!(fx.ctx().rows(RETRY_LOG_TABLE).unwrap().is_empty());
    }

    #[test]
    fn aborts_at_max_attempts_and_stops_scheduling() {
        let fx = Fixture::new("retry", "job-1");
        let payload = RetryPayload::first(json!({"order": 7}), &policy(3, 10));
        RetryableTask::new(METHOD)
            .start(&mut fx.ctx(), &payload)
            .unwrap();

        let outcomes = drive(&fx, 5);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(
            outcomes.last(),
            Some(&RetryOutcome::Aborted { attempt_count: 3 })
        );

        let log = fx.ctx().rows(RETRY_LOG_TABLE).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].data["attempt_count"], 3);
        assert_eq!(log[0].data["business_payload"]["order"], 7);

        let far = chrono::Utc::now() + Duration::days(3650);
        assert!(fx.tasks.range_due(far).unwrap().is_empty());
    }

    #[test]
    fn zero_max_attempts_aborts_on_first_failure() {
        let fx = Fixture::new("retry", "job-1");
        let payload = RetryPayload::first(json!({}), &policy(0, 10));
        let outcome = RetryableTask::new(METHOD)
            .run(&mut fx.ctx(), &payload, |_, _| anyhow::bail!("nope"))
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Aborted { attempt_count: 0 });
    }
}
