// src/cache/store.rs

//! Write-through persistence hook for the output cache.
//!
//! The in-memory cache is authoritative; a [`CacheStore`] only receives a
//! row on every state transition and supplies rows back at startup so a
//! restarted process does not re-publish outcomes it already delivered.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::input::JobId;
use crate::output::Msg;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a finished run, in a shape any backend can store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordedOutcome {
    Ok(serde_json::Value),
    Err(Msg),
}

/// One persisted row per cache entry, rewritten on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub op_id: String,
    pub key_digest: String,
    pub build: u64,
    pub value_digest: String,
    pub outcome: Option<RecordedOutcome>,
    pub job_id: Option<JobId>,
    pub ready_ts: Option<SystemTime>,
    pub running_ts: Option<SystemTime>,
    pub finished_ts: Option<SystemTime>,
    pub rebuild_requested: bool,
}

/// Durable backend contract.
pub trait CacheStore: Send + Sync {
    /// Persist the row (replacing any previous row for the same
    /// `(op_id, key_digest)`).
    fn write(&self, record: &EntryRecord) -> Result<()>;

    /// All rows previously written for an operation.
    fn load(&self, op_id: &str) -> Result<Vec<EntryRecord>>;
}

/// In-memory store, mainly for tests and as a reference implementation.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(String, String), EntryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, unordered.
    pub fn rows(&self) -> Vec<EntryRecord> {
        lock(&self.rows).values().cloned().collect()
    }
}

impl CacheStore for MemoryStore {
    fn write(&self, record: &EntryRecord) -> Result<()> {
        lock(&self.rows).insert(
            (record.op_id.clone(), record.key_digest.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn load(&self, op_id: &str) -> Result<Vec<EntryRecord>> {
        Ok(lock(&self.rows)
            .values()
            .filter(|r| r.op_id == op_id)
            .cloned()
            .collect())
    }
}
