//! redb table definitions for the Tideline state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Workload specs keyed by `{namespace}/{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Workload status keyed by `{workload_id}`.
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");

/// Stabilization state keyed by `{workload_id}`.
pub const STABILIZATION: TableDefinition<&str, &[u8]> = TableDefinition::new("stabilization");

/// Scaling events keyed by `{workload_id}:{at:020}:{seq:020}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");
