//! Persistent storage for scheduled tasks using redb.
//!
//! # Table design
//!
//! `TASKS` uses a 24-byte composite key:
//! ```text
//! [ not_before_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Because the timestamp occupies the high bytes in big-endian encoding,
//! byte ordering equals due-time ordering. A single range scan
//! `..=due_upper_bound(now)` returns every task due by `now`; only `Pending`
//! status filtering is needed in application code.
//!
//! `TASK_INDEX` maps the 16 uuid bytes to the composite key so that
//! `get`, `set_status` and `cancel` don't have to scan.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{HoldfastError, Result};
use crate::types::ActorKey;

use super::task::{ScheduledTask, TaskStatus};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: 24-byte composite (not_before_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded ScheduledTask
const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");

/// Key: uuid bytes. Value: composite key into `TASKS`.
const TASK_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("task_index");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn task_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = u64::try_from(ts.timestamp_millis()).unwrap_or(0);
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Upper bound for a range scan returning all tasks due by `now`.
///
/// The UUID suffix is `0xff` × 16, which is greater than any valid UUID,
/// so all tasks with `not_before_ms <= now_ms` are included.
fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

// ---------------------------------------------------------------------------
// TaskDb
// ---------------------------------------------------------------------------

/// Persistent store for `ScheduledTask` records.
pub struct TaskDb {
    db: Database,
}

impl TaskDb {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(HoldfastError::store)?;
        let wt = db.begin_write().map_err(HoldfastError::store)?;
        wt.open_table(TASKS).map_err(HoldfastError::store)?;
        wt.open_table(TASK_INDEX).map_err(HoldfastError::store)?;
        wt.commit().map_err(HoldfastError::store)?;
        Ok(Self { db })
    }

    /// Create and persist a pending task. Returns its id.
    pub fn schedule(
        &self,
        actor: &ActorKey,
        delay_seconds: u64,
        method: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let task = ScheduledTask::new(actor.clone(), method, payload, now, delay_seconds);
        self.insert(&task)?;
        tracing::debug!(
            task = %task.id,
            actor = %actor,
            method,
            not_before = %task.not_before,
            "task scheduled"
        );
        Ok(task.id)
    }

    /// Insert a task. The key is derived from `not_before`.
    pub fn insert(&self, task: &ScheduledTask) -> Result<()> {
        let key = task_key(task.not_before, task.id);
        let value = serde_json::to_vec(task)?;
        let wt = self.db.begin_write().map_err(HoldfastError::store)?;
        {
            let mut table = wt.open_table(TASKS).map_err(HoldfastError::store)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(HoldfastError::store)?;
            let mut index = wt.open_table(TASK_INDEX).map_err(HoldfastError::store)?;
            index
                .insert(task.id.as_bytes().as_slice(), key.as_slice())
                .map_err(HoldfastError::store)?;
        }
        wt.commit().map_err(HoldfastError::store)?;
        Ok(())
    }

    /// Look up a task by id.
    pub fn get(&self, id: Uuid) -> Result<Option<ScheduledTask>> {
        let rt = self.db.begin_read().map_err(HoldfastError::store)?;
        let index = rt.open_table(TASK_INDEX).map_err(HoldfastError::store)?;
        let table = rt.open_table(TASKS).map_err(HoldfastError::store)?;

        let Some(key) = index
            .get(id.as_bytes().as_slice())
            .map_err(HoldfastError::store)?
        else {
            return Ok(None);
        };
        let Some(value) = table.get(key.value()).map_err(HoldfastError::store)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(value.value())?))
    }

    /// Update the status of a task. Fails with `NotFound` for unknown ids.
    pub fn set_status(&self, id: Uuid, status: TaskStatus) -> Result<ScheduledTask> {
        self.modify(id, |task| {
            task.status = status;
            true
        })?
        .ok_or_else(|| HoldfastError::NotFound(format!("task {id}")))
    }

    /// Cancel a pending task.
    ///
    /// Returns `true` iff the task existed and had not yet fired. Tasks that
    /// are running, finished, already cancelled or unknown return `false`
    /// and are left untouched.
    pub fn cancel(&self, id: Uuid) -> Result<bool> {
        let mut cancelled = false;
        self.modify(id, |task| {
            if task.is_pending() {
                task.status = TaskStatus::Cancelled;
                cancelled = true;
            }
            cancelled
        })?;
        Ok(cancelled)
    }

    /// Read-modify-write of one task inside a single write transaction.
    ///
    /// `f` returns whether it changed the task; unchanged tasks are not
    /// rewritten. Returns `None` when the id is unknown.
    fn modify<F>(&self, id: Uuid, f: F) -> Result<Option<ScheduledTask>>
    where
        F: FnOnce(&mut ScheduledTask) -> bool,
    {
        let wt = self.db.begin_write().map_err(HoldfastError::store)?;
        let result = {
            let index = wt.open_table(TASK_INDEX).map_err(HoldfastError::store)?;
            let mut table = wt.open_table(TASKS).map_err(HoldfastError::store)?;

            let key: Option<Vec<u8>> = index
                .get(id.as_bytes().as_slice())
                .map_err(HoldfastError::store)?
                .map(|k| k.value().to_vec());
            let Some(key) = key else {
                return Ok(None);
            };
            let task: Option<ScheduledTask> = match table
                .get(key.as_slice())
                .map_err(HoldfastError::store)?
            {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            let Some(mut task) = task else {
                return Ok(None);
            };

            if f(&mut task) {
                task.updated_at = Utc::now();
                let value = serde_json::to_vec(&task)?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(HoldfastError::store)?;
            }
            task
        };
        wt.commit().map_err(HoldfastError::store)?;
        Ok(Some(result))
    }

    /// Return all `Pending` tasks whose `not_before` is `<= now`.
    ///
    /// Results are in due-time order (ascending) due to the composite key design.
    pub fn range_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let upper = due_upper_bound(now);
        let rt = self.db.begin_read().map_err(HoldfastError::store)?;
        let table = rt.open_table(TASKS).map_err(HoldfastError::store)?;

        let mut result = Vec::new();
        for entry in table
            .range(..=upper.as_slice())
            .map_err(HoldfastError::store)?
        {
            let (_, v) = entry.map_err(HoldfastError::store)?;
            let task: ScheduledTask = serde_json::from_slice(v.value())?;
            if task.is_pending() {
                result.push(task);
            }
        }
        Ok(result)
    }

    /// On startup, mark any `Running` task older than `max_age` as `Failed`.
    ///
    /// Returns the number of tasks recovered.
    pub fn startup_recovery(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).map_err(HoldfastError::store)?;

        let mut count = 0u32;
        for task in self.list_all()? {
            if matches!(task.status, TaskStatus::Running) && task.updated_at < cutoff {
                self.set_status(
                    task.id,
                    TaskStatus::Failed {
                        reason: "recovered from restart".into(),
                    },
                )?;
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }

    /// List all tasks, newest first.
    pub fn list_all(&self) -> Result<Vec<ScheduledTask>> {
        let rt = self.db.begin_read().map_err(HoldfastError::store)?;
        let table = rt.open_table(TASKS).map_err(HoldfastError::store)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(HoldfastError::store)? {
            let (_, v) = entry.map_err(HoldfastError::store)?;
            let task: ScheduledTask = serde_json::from_slice(v.value())?;
            result.push(task);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// List the tasks belonging to one actor, newest first.
    pub fn list_for_actor(&self, actor: &ActorKey) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| &t.actor == actor)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
