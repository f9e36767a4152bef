//! Human review gate: pause an actor until an authorized person decides.
//!
//! ```text
//! idle ──request_review──▶ pending_review ──proceed/override──▶ running ──▶ completed
//!                                 │                                 │
//!                                 └──────────── abort ──────────────┴──(resume error)──▶ aborted
//! ```
//!
//! Waiting is just the persisted `pending_review` status; nothing blocks.
//! Every transition is broadcast to the actor's subscribers as a
//! `state_update` carrying the whole session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actor::ActorContext;
use crate::channel::ChannelMessage;
use crate::error::{HoldfastError, Result};
use crate::token::InterventionClaims;

pub const SESSION_SLOT: &str = "_review_session";

// ---------------------------------------------------------------------------
// ReviewStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Idle,
    PendingReview,
    Running,
    Aborted,
    Completed,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewStatus::Idle => "idle",
            ReviewStatus::PendingReview => "pending_review",
            ReviewStatus::Running => "running",
            ReviewStatus::Aborted => "aborted",
            ReviewStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Session and commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanReviewSession {
    pub status: ReviewStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Expiry of the token handed out for the pending review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Nonce of that token. Tokens minted for earlier reviews don't match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_nonce: Option<String>,
}

/// A reviewer's decision, as received on the connection channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateCommand {
    Proceed,
    Override { data: Value },
    Abort,
}

impl GateCommand {
    fn target(&self) -> ReviewStatus {
        match self {
            GateCommand::Proceed | GateCommand::Override { .. } => ReviewStatus::Running,
            GateCommand::Abort => ReviewStatus::Aborted,
        }
    }
}

/// What `request_review` hands back to the caller to pass on to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewTicket {
    pub url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

pub fn session(ctx: &ActorContext<'_>) -> Result<HumanReviewSession> {
    ctx.load(SESSION_SLOT)
}

fn transition(ctx: &mut ActorContext<'_>, session: HumanReviewSession) -> Result<()> {
    let state = serde_json::to_value(&session)?;
    ctx.commit(SESSION_SLOT, session)?;
    ctx.broadcast(ChannelMessage::StateUpdate { state });
    Ok(())
}

/// Pause on `data` and mint a capability URL for the reviewer.
///
/// Allowed from `idle`, `completed` and `aborted`.
pub fn request_review(ctx: &mut ActorContext<'_>, data: Value) -> Result<ReviewTicket> {
    let current = session(ctx)?;
    if matches!(
        current.status,
        ReviewStatus::PendingReview | ReviewStatus::Running
    ) {
        return Err(HoldfastError::InvalidTransition {
            from: current.status.to_string(),
            to: ReviewStatus::PendingReview.to_string(),
            reason: "a review is already in progress".into(),
        });
    }

    let ttl = ctx.config().review.token_ttl_seconds;
    let (token, claims) = ctx.signer().mint(ctx.key(), ttl, ctx.now())?;
    let expires_at = claims
        .expires_at_utc()
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let url = format!(
        "{}/api/intervene/{}/{}?token={token}",
        ctx.config().review.base_url.trim_end_matches('/'),
        ctx.key().kind(),
        ctx.key().id(),
    );

    transition(
        ctx,
        HumanReviewSession {
            status: ReviewStatus::PendingReview,
            data,
            updated_at: Some(ctx.now()),
            token_expires_at: Some(expires_at),
            token_nonce: Some(claims.nonce),
        },
    )?;
    tracing::info!(actor = %ctx.key(), expires_at = %expires_at, "review requested");

    Ok(ReviewTicket {
        url,
        token,
        expires_at,
    })
}

/// Check that a verified token belongs to the review that is pending now.
///
/// When nothing is pending there is nothing to authorize against; `decide`
/// then rejects the command as an invalid transition.
pub fn authorize(ctx: &ActorContext<'_>, claims: &InterventionClaims) -> Result<()> {
    let current = session(ctx)?;
    if current.status != ReviewStatus::PendingReview {
        return Ok(());
    }
    if current.token_nonce.as_deref() != Some(claims.nonce.as_str()) {
        return Err(HoldfastError::TokenInvalid(
            "token was issued for a different review".into(),
        ));
    }
    if current.token_expires_at.is_some_and(|exp| ctx.now() >= exp) {
        return Err(HoldfastError::TokenInvalid("token expired".into()));
    }
    Ok(())
}

/// Apply a reviewer's command to a pending review.
///
/// `proceed` and `override` move to `running`, call `resume` with the
/// (possibly replaced) data, then finish as `completed`. If `resume` fails
/// the session ends as `aborted` and the error is returned.
pub fn decide<F>(
    ctx: &mut ActorContext<'_>,
    command: GateCommand,
    resume: F,
) -> Result<HumanReviewSession>
where
    F: FnOnce(&mut ActorContext<'_>, &Value) -> Result<()>,
{
    let current = session(ctx)?;
    if current.status != ReviewStatus::PendingReview {
        return Err(HoldfastError::InvalidTransition {
            from: current.status.to_string(),
            to: command.target().to_string(),
            reason: "no review is pending".into(),
        });
    }

    let now = ctx.now();
    let data = match command {
        GateCommand::Abort => {
            let aborted = HumanReviewSession {
                status: ReviewStatus::Aborted,
                data: current.data,
                updated_at: Some(now),
                token_expires_at: None,
                token_nonce: None,
            };
            transition(ctx, aborted.clone())?;
            tracing::info!(actor = %ctx.key(), "review aborted by reviewer");
            return Ok(aborted);
        }
        GateCommand::Proceed => current.data,
        GateCommand::Override { data } => data,
    };

    transition(
        ctx,
        HumanReviewSession {
            status: ReviewStatus::Running,
            data: data.clone(),
            updated_at: Some(now),
            token_expires_at: None,
            token_nonce: None,
        },
    )?;

    match resume(ctx, &data) {
        Ok(()) => {
            let completed = HumanReviewSession {
                status: ReviewStatus::Completed,
                data,
                updated_at: Some(now),
                token_expires_at: None,
                token_nonce: None,
            };
            transition(ctx, completed.clone())?;
            tracing::info!(actor = %ctx.key(), "review completed");
            Ok(completed)
        }
        Err(e) => {
            tracing::warn!(actor = %ctx.key(), error = %e, "resume failed, aborting review");
            transition(
                ctx,
                HumanReviewSession {
                    status: ReviewStatus::Aborted,
                    data,
                    updated_at: Some(now),
                    token_expires_at: None,
                    token_nonce: None,
                },
            )?;
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use serde_json::json;

    fn statuses(ctx: &mut ActorContext<'_>) -> Vec<String> {
        ctx.take_outbox()
            .into_iter()
            .map(|m| match m {
                ChannelMessage::StateUpdate { state } => {
                    state["status"].as_str().unwrap_or_default().to_string()
                }
                ChannelMessage::Error { message } => format!("error: {message}"),
            })
            .collect()
    }

    #[test]
    fn request_review_mints_url_bound_to_actor() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        let ticket = request_review(&mut ctx, json!({"amount": 100})).unwrap();

        assert!(ticket
            .url
            .starts_with("http://localhost:3141/api/intervene/approval/order-1?token="));
        assert!(ticket.url.ends_with(&ticket.token));
        fx.signer.verify(&ticket.token, &fx.key, ctx.now()).unwrap();

        let s = session(&ctx).unwrap();
        assert_eq!(s.status, ReviewStatus::PendingReview);
        assert_eq!(s.data, json!({"amount": 100}));
        assert_eq!(s.token_expires_at, Some(ticket.expires_at));
        assert_eq!(statuses(&mut ctx), vec!["pending_review"]);
    }

    #[test]
    fn override_replaces_data_and_completes() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        request_review(&mut ctx, json!({"amount": 100})).unwrap();
        ctx.take_outbox();

        let mut resumed_with = None;
        let done = decide(
            &mut ctx,
            GateCommand::Override {
                data: json!({"amount": 50}),
            },
            |_, data| {
                resumed_with = Some(data.clone());
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(done.status, ReviewStatus::Completed);
        assert_eq!(done.data, json!({"amount": 50}));
        assert_eq!(resumed_with, Some(json!({"amount": 50})));
        assert_eq!(statuses(&mut ctx), vec!["running", "completed"]);
        assert_eq!(session(&ctx).unwrap(), done);
    }

    #[test]
    fn proceed_keeps_data() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        request_review(&mut ctx, json!({"amount": 100})).unwrap();
        let done = decide(&mut ctx, GateCommand::Proceed, |_, _| Ok(())).unwrap();
        assert_eq!(done.data, json!({"amount": 100}));
        assert_eq!(done.status, ReviewStatus::Completed);
    }

    #[test]
    fn abort_skips_resume() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        request_review(&mut ctx, json!({"amount": 100})).unwrap();
        ctx.take_outbox();

        let done = decide(&mut ctx, GateCommand::Abort, |_, _| {
            panic!("resume must not run on abort")
        })
        .unwrap();
        assert_eq!(done.status, ReviewStatus::Aborted);
        assert_eq!(statuses(&mut ctx), vec!["aborted"]);
    }

    #[test]
    fn command_without_pending_review_is_rejected() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        let err = decide(&mut ctx, GateCommand::Proceed, |_, _| Ok(())).unwrap_err();
        match err {
            HoldfastError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "idle");
                assert_eq!(to, "running");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(session(&ctx).unwrap().status, ReviewStatus::Idle);
        assert!(statuses(&mut ctx).is_empty());
    }

    #[test]
    fn second_command_after_completion_is_rejected() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        request_review(&mut ctx, json!({"amount": 100})).unwrap();
        decide(&mut ctx, GateCommand::Proceed, |_, _| Ok(())).unwrap();
        assert!(matches!(
            decide(&mut ctx, GateCommand::Abort, |_, _| Ok(())),
            Err(HoldfastError::InvalidTransition { .. })
        ));
        assert_eq!(session(&ctx).unwrap().status, ReviewStatus::Completed);
    }

    #[test]
    fn request_while_pending_is_rejected_but_allowed_after_completion() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        request_review(&mut ctx, json!({"amount": 1})).unwrap();
        assert!(matches!(
            request_review(&mut ctx, json!({"amount": 2})),
            Err(HoldfastError::InvalidTransition { .. })
        ));
        decide(&mut ctx, GateCommand::Proceed, |_, _| Ok(())).unwrap();
        request_review(&mut ctx, json!({"amount": 3})).unwrap();
        assert_eq!(session(&ctx).unwrap().data, json!({"amount": 3}));
    }

    #[test]
    fn failed_resume_aborts_and_surfaces_error() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        request_review(&mut ctx, json!({"amount": 100})).unwrap();
        ctx.take_outbox();

        let err = decide(&mut ctx, GateCommand::Proceed, |_, _| {
            Err(HoldfastError::Validation("ledger closed".into()))
        })
        .unwrap_err();
        assert!(matches!(err, HoldfastError::Validation(_)));
        assert_eq!(session(&ctx).unwrap().status, ReviewStatus::Aborted);
        assert_eq!(statuses(&mut ctx), vec!["running", "aborted"]);
    }

    #[test]
    fn only_the_pending_reviews_token_is_authorized() {
        let fx = Fixture::new("approval", "order-1");
        let mut ctx = fx.ctx();
        let first = request_review(&mut ctx, json!({"amount": 100})).unwrap();
        let first = fx.signer.verify(&first.token, &fx.key, ctx.now()).unwrap();
        authorize(&ctx, &first).unwrap();
        decide(&mut ctx, GateCommand::Proceed, |_, _| Ok(())).unwrap();

        let second = request_review(&mut ctx, json!({"amount": 9999})).unwrap();
        let second = fx.signer.verify(&second.token, &fx.key, ctx.now()).unwrap();
        match authorize(&ctx, &first).unwrap_err() {
            HoldfastError::TokenInvalid(reason) => assert!(reason.contains("different review")),
            other => panic!("expected TokenInvalid, got {other:?}"),
        }
        authorize(&ctx, &second).unwrap();
        assert_eq!(session(&ctx).unwrap().status, ReviewStatus::PendingReview);
    }

    #[test]
    fn authorize_rejects_after_session_token_expiry() {
        let fx = Fixture::new("approval", "order-1");
        let start = Utc::now();
        let mut ctx = fx.ctx_at(start);
        let ticket = request_review(&mut ctx, json!({})).unwrap();
        let claims = fx.signer.verify(&ticket.token, &fx.key, start).unwrap();

        let late = fx.ctx_at(ticket.expires_at);
        assert!(matches!(
            authorize(&late, &claims),
            Err(HoldfastError::TokenInvalid(_))
        ));
    }

    #[test]
    fn gate_command_wire_shape() {
        let cmd: GateCommand =
            serde_json::from_value(json!({"type": "override", "data": {"amount": 50}})).unwrap();
        assert_eq!(
            cmd,
            GateCommand::Override {
                data: json!({"amount": 50})
            }
        );
        let cmd: GateCommand = serde_json::from_value(json!({"type": "proceed"})).unwrap();
        assert_eq!(cmd, GateCommand::Proceed);
    }
}
