//! tideline-autoscale: utilization-driven replica scaling.
//!
//! Turns per-workload utilization snapshots into replica counts and writes
//! them to the workload's scale subresource.
//!
//! # Scaling Algorithm
//!
//! ```text
//! ratio   = utilization / target
//! desired = ceil(current * ratio)            // unless |ratio - 1| <= tolerance
//! desired = rate_limit(current, desired)     // +100% / -50% per cycle by default
//! desired = clamp(desired, min, max)
//!
//! if channel(direction) is cooling down:     // up 30s, down 300s by default
//!     suppress
//! else:
//!     apply with retry, then start cooldown
//! ```
//!
//! # Concurrency
//!
//! [`Autoscaler::run`] owns the tick. Each active workload gets at most one
//! cycle in flight, bounded by a global semaphore and a per-cycle deadline.

pub mod controller;
pub mod cycle;
pub mod decision;
pub mod error;
pub mod executor;
pub mod registry;
pub mod stabilization;

pub use controller::{Autoscaler, EngineSettings, epoch_secs};
pub use cycle::{CycleContext, CycleOutcome, EVENT_HISTORY_LIMIT, WorkloadSlot, run_cycle};
pub use decision::ScalingDecisionEngine;
pub use error::{AutoscaleError, AutoscaleResult};
pub use executor::{
    Ack, DryRunScaleTarget, ExecutionError, HttpScaleTarget, RetryPolicy, ScaleExecutor,
    ScaleTarget, ScaleTargetError,
};
pub use registry::{WorkloadHandle, WorkloadRegistry};
pub use stabilization::{ChannelState, StabilizationWindow, Verdict};
