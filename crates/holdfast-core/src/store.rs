//! Durable per-actor state using redb.
//!
//! # Table design
//!
//! `SLOTS` holds named state blobs, keyed by `(actor_key, slot)`. Each slot is
//! one JSON document that is replaced wholesale on commit.
//!
//! `ROWS` is the append-only structured table, keyed by
//! `(actor_key, table, seq)`. `seq` is allocated per `(actor_key, table)` as
//! one past the current last row, inside the same write transaction as the
//! insert, so appends never collide.
//!
//! Nothing in either table is shared between actor keys.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{HoldfastError, Result};
use crate::types::ActorKey;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const SLOTS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("slots");
const ROWS: TableDefinition<(&str, &str, u64), &[u8]> = TableDefinition::new("rows");

/// One entry of an actor's structured table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// StateDb
// ---------------------------------------------------------------------------

/// Persistent store for actor state slots and rows.
pub struct StateDb {
    db: Database,
}

impl StateDb {
    /// Open or create the redb database at `path`.
    ///
    /// Creates both tables if they don't already exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(HoldfastError::store)?;
        let wt = db.begin_write().map_err(HoldfastError::store)?;
        wt.open_table(SLOTS).map_err(HoldfastError::store)?;
        wt.open_table(ROWS).map_err(HoldfastError::store)?;
        wt.commit().map_err(HoldfastError::store)?;
        Ok(Self { db })
    }

    /// Read a slot. `None` if it was never written.
    pub fn get<T: DeserializeOwned>(&self, actor: &ActorKey, slot: &str) -> Result<Option<T>> {
        let key = actor.to_string();
        let rt = self.db.begin_read().map_err(HoldfastError::store)?;
        let table = rt.open_table(SLOTS).map_err(HoldfastError::store)?;
        match table
            .get((key.as_str(), slot))
            .map_err(HoldfastError::store)?
        {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Replace a slot.
    pub fn set<T: Serialize>(&self, actor: &ActorKey, slot: &str, value: &T) -> Result<()> {
        let key = actor.to_string();
        let bytes = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(HoldfastError::store)?;
        {
            let mut table = wt.open_table(SLOTS).map_err(HoldfastError::store)?;
            table
                .insert((key.as_str(), slot), bytes.as_slice())
                .map_err(HoldfastError::store)?;
        }
        wt.commit().map_err(HoldfastError::store)?;
        Ok(())
    }

    /// Atomic read-modify-write of a slot.
    ///
    /// `f` sees the current value (or `None`) and returns the replacement.
    /// If `f` fails the transaction is dropped and nothing is written.
    pub fn update<T, F>(&self, actor: &ActorKey, slot: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Result<T>,
    {
        let key = actor.to_string();
        let wt = self.db.begin_write().map_err(HoldfastError::store)?;
        let next = {
            let mut table = wt.open_table(SLOTS).map_err(HoldfastError::store)?;
            let current: Option<T> = match table
                .get((key.as_str(), slot))
                .map_err(HoldfastError::store)?
            {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            let next = f(current)?;
            let bytes = serde_json::to_vec(&next)?;
            table
                .insert((key.as_str(), slot), bytes.as_slice())
                .map_err(HoldfastError::store)?;
            next
        };
        wt.commit().map_err(HoldfastError::store)?;
        Ok(next)
    }

    /// Append a row to `table` and return its sequence number (starting at 1).
    pub fn append(&self, actor: &ActorKey, table: &str, data: serde_json::Value) -> Result<u64> {
        let key = actor.to_string();
        let wt = self.db.begin_write().map_err(HoldfastError::store)?;
        let seq = {
            let mut rows = wt.open_table(ROWS).map_err(HoldfastError::store)?;
            let last = rows
                .range((key.as_str(), table, 0u64)..=(key.as_str(), table, u64::MAX))
                .map_err(HoldfastError::store)?
                .next_back()
                .transpose()
                .map_err(HoldfastError::store)?
                .map(|(k, _)| k.value().2);
            let seq = last.map_or(1, |n| n.saturating_add(1));
            let row = Row {
                seq,
                recorded_at: Utc::now(),
                data,
            };
            let bytes = serde_json::to_vec(&row)?;
            rows.insert((key.as_str(), table, seq), bytes.as_slice())
                .map_err(HoldfastError::store)?;
            seq
        };
        wt.commit().map_err(HoldfastError::store)?;
        Ok(seq)
    }

    /// All rows of `table`, oldest first.
    pub fn rows(&self, actor: &ActorKey, table: &str) -> Result<Vec<Row>> {
        let key = actor.to_string();
        let rt = self.db.begin_read().map_err(HoldfastError::store)?;
        let rows = rt.open_table(ROWS).map_err(HoldfastError::store)?;

        let mut result = Vec::new();
        for entry in rows
            .range((key.as_str(), table, 0u64)..=(key.as_str(), table, u64::MAX))
            .map_err(HoldfastError::store)?
        {
            let (_, v) = entry.map_err(HoldfastError::store)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, StateDb) {
        let dir = TempDir::new().unwrap();
        let db = StateDb::open(&dir.path().join("state.redb")).unwrap();
        (dir, db)
    }

    fn key(id: &str) -> ActorKey {
        ActorKey::new("test", id).unwrap()
    }

    #[test]
    fn get_missing_slot_is_none() {
        let (_dir, db) = open_tmp();
        let v: Option<u32> = db.get(&key("a"), "counter").unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn slots_are_scoped_per_actor() {
        let (_dir, db) = open_tmp();
        db.set(&key("a"), "state", &json!({"n": 1})).unwrap();
        db.set(&key("b"), "state", &json!({"n": 2})).unwrap();

        let a: serde_json::Value = db.get(&key("a"), "state").unwrap().unwrap();
        let b: serde_json::Value = db.get(&key("b"), "state").unwrap().unwrap();
        assert_eq!(a["n"], 1);
        assert_eq!(b["n"], 2);
    }

    #[test]
    fn update_sees_previous_value() {
        let (_dir, db) = open_tmp();
        let k = key("a");
        db.update(&k, "n", |cur: Option<u32>| Ok(cur.unwrap_or(0) + 1))
            .unwrap();
        let n = db
            .update(&k, "n", |cur: Option<u32>| Ok(cur.unwrap_or(0) + 1))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn failed_update_writes_nothing() {
        let (_dir, db) = open_tmp();
        let k = key("a");
        db.set(&k, "n", &7u32).unwrap();
        let err = db
            .update(&k, "n", |_: Option<u32>| {
                Err(HoldfastError::Validation("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, HoldfastError::Validation(_)));
        assert_eq!(db.get::<u32>(&k, "n").unwrap(), Some(7));
    }

    #[test]
    fn append_allocates_sequential_ids_per_table() {
        let (_dir, db) = open_tmp();
        let k = key("a");
        assert_eq!(db.append(&k, "log", json!("first")).unwrap(), 1);
        assert_eq!(db.append(&k, "log", json!("second")).unwrap(), 2);
        assert_eq!(db.append(&k, "other", json!("x")).unwrap(), 1);
        assert_eq!(db.append(&key("b"), "log", json!("y")).unwrap(), 1);

        let rows = db.rows(&k, "log").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].data, json!("first"));
        assert_eq!(rows[1].seq, 2);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.redb");
        {
            let db = StateDb::open(&path).unwrap();
            db.set(&key("a"), "state", &json!({"kept": true})).unwrap();
        }
        let db = StateDb::open(&path).unwrap();
        let v: serde_json::Value = db.get(&key("a"), "state").unwrap().unwrap();
        assert_eq!(v["kept"], true);
    }
}
