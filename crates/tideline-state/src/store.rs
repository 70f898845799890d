//! StateStore: redb-backed state persistence for Tideline.
//!
//! Provides typed operations over workload specs, workload status,
//! stabilization state and scaling events. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Tie-breaker for events recorded within the same second.
    event_seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            event_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(STATUSES).map_err(map_err!(Table))?;
        txn.open_table(STABILIZATION).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Deserialize every value whose key starts with `prefix`, in key order.
    fn scan_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or update a workload spec.
    pub fn put_workload(&self, spec: &WorkloadSpec) -> StateResult<()> {
        let key = spec.table_key();
        self.put_json(WORKLOADS, &key, spec)?;
        debug!(%key, active = spec.active, "workload stored");
        Ok(())
    }

    /// Get a workload by namespace/name key.
    pub fn get_workload(&self, key: &str) -> StateResult<Option<WorkloadSpec>> {
        self.get_json(WORKLOADS, key)
    }

    /// List all workloads, active or not.
    pub fn list_workloads(&self) -> StateResult<Vec<WorkloadSpec>> {
        self.scan_json(WORKLOADS, "")
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Insert or update a workload status.
    pub fn put_status(&self, status: &WorkloadStatus) -> StateResult<()> {
        self.put_json(STATUSES, &status.workload_id, status)
    }

    pub fn get_status(&self, workload_id: &str) -> StateResult<Option<WorkloadStatus>> {
        self.get_json(STATUSES, workload_id)
    }

    pub fn list_statuses(&self) -> StateResult<Vec<WorkloadStatus>> {
        self.scan_json(STATUSES, "")
    }

    // ── Stabilization ──────────────────────────────────────────────

    /// Insert or update the cooldown state of a workload.
    pub fn put_stabilization(&self, state: &StabilizationState) -> StateResult<()> {
        self.put_json(STABILIZATION, &state.workload_id, state)
    }

    pub fn get_stabilization(&self, workload_id: &str) -> StateResult<Option<StabilizationState>> {
        self.get_json(STABILIZATION, workload_id)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append an event to a workload's history.
    pub fn append_event(&self, event: &ScaleEvent) -> StateResult<()> {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        self.put_json(EVENTS, &event.table_key(seq), event)
    }

    /// The most recent `limit` events for a workload, oldest first.
    pub fn list_events(&self, workload_id: &str, limit: usize) -> StateResult<Vec<ScaleEvent>> {
        let prefix = format!("{workload_id}:");
        let mut events: Vec<ScaleEvent> = self.scan_json(EVENTS, &prefix)?;
        let excess = events.len().saturating_sub(limit);
        events.drain(..excess);
        Ok(events)
    }

    /// Drop all but the newest `keep` events of a workload. Returns the number removed.
    pub fn prune_events(&self, workload_id: &str, keep: usize) -> StateResult<usize> {
        let prefix = format!("{workload_id}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };

        let excess = keys.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }

        // Keys sort chronologically, so the oldest come first.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            for key in &keys[..excess] {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%workload_id, removed = excess, "events pruned");
        Ok(excess)
    }
}
