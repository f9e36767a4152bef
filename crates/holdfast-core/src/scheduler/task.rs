//! Scheduled task data model.
//!
//! A `ScheduledTask` is a deferred invocation of one actor method. The actor
//! that requested it keeps only the task id; the task itself belongs to
//! `TaskDb`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ActorKey;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a scheduled task.
///
/// Transitions: `Pending → Running → Completed | Failed`, or
/// `Pending → Cancelled`.
///
/// The host writes `Running` *before* dispatching to the actor. On restart,
/// any task stuck in `Running` is recovered to `Failed` by `startup_recovery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for `not_before`.
    Pending,
    /// Handed to the actor (or crashed before completing).
    Running,
    /// Handler returned normally.
    Completed,
    /// Handler returned an error or the process was interrupted.
    Failed { reason: String },
    /// Cancelled before it fired.
    Cancelled,
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduledTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub actor: ActorKey,
    /// Handler name passed to `Actor::handle_task`.
    pub method: String,
    pub payload: serde_json::Value,
    pub not_before: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Create a new task in `Pending` state, due `delay_seconds` after `now`.
    pub fn new(
        actor: ActorKey,
        method: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
        delay_seconds: u64,
    ) -> Self {
        let delay = i64::try_from(delay_seconds).unwrap_or(i64::MAX);
        let not_before = now
            .checked_add_signed(chrono::Duration::seconds(delay.min(i64::MAX / 1000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            actor,
            method: method.into(),
            payload,
            not_before,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Pending)
    }
}
