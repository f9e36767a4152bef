//! Migration guard: one-time actor setup with a permanent lock on failure.
//!
//! The outcome of the first setup attempt is written to a single slot and
//! never rewritten. A `failed` record locks the actor: every later call,
//! message or task firing is refused with `InstanceLocked`. There is no
//! unlock path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::ActorContext;
use crate::error::{HoldfastError, Result};

/// Slot holding the `MigrationRecord`.
pub const STATUS_SLOT: &str = "_migration_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Uninitialized,
    Ok,
    Failed,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Uninitialized => f.write_str("uninitialized"),
            MigrationStatus::Ok => f.write_str("ok"),
            MigrationStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub status: MigrationStatus,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn record(ctx: &ActorContext<'_>) -> Result<Option<MigrationRecord>> {
    ctx.load_opt(STATUS_SLOT)
}

pub fn status(ctx: &ActorContext<'_>) -> Result<MigrationStatus> {
    Ok(record(ctx)?.map_or(MigrationStatus::Uninitialized, |r| r.status))
}

/// Run `setup` unless a status has already been recorded.
///
/// A setup error is logged and stored as `failed`; it is not returned.
/// Only failures to read or write the status record itself surface as `Err`.
pub fn initialize<F>(ctx: &mut ActorContext<'_>, setup: F) -> Result<MigrationStatus>
where
    F: FnOnce(&mut ActorContext<'_>) -> anyhow::Result<()>,
{
    if let Some(existing) = record(ctx)? {
        return Ok(existing.status);
    }

    let record = match setup(ctx) {
        Ok(()) => {
            tracing::info!(actor = %ctx.key(), "migration ok");
            MigrationRecord {
                status: MigrationStatus::Ok,
                recorded_at: ctx.now(),
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(actor = %ctx.key(), error = %format!("{e:#}"), "migration failed, locking actor");
            MigrationRecord {
                status: MigrationStatus::Failed,
                recorded_at: ctx.now(),
                error: Some(format!("{e:#}")),
            }
        }
    };
    let status = record.status;
    ctx.commit(STATUS_SLOT, record)?;
    Ok(status)
}

/// Refuse to proceed if the actor's setup has ever failed.
///
/// A missing record counts as not-yet-migrated and passes.
pub fn assert_operational(ctx: &ActorContext<'_>) -> Result<()> {
    match record(ctx)? {
        Some(MigrationRecord {
            status: MigrationStatus::Failed,
            error,
            ..
        }) => Err(HoldfastError::InstanceLocked {
            actor: ctx.key().to_string(),
            message: match error {
                Some(e) => format!("initialization failed ({e}); manual recovery required"),
                None => "initialization failed; manual recovery required".to_string(),
            },
        }),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
