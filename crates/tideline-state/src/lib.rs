//! tideline-state: embedded state store for Tideline.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for workload specs, workload status, stabilization state and the
//! per-workload scaling event history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{workload_id}:{at}:{seq}`) enable
//! prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
