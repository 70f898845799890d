//! Domain types for the Tideline state store.
//!
//! These types represent the persisted state of autoscaled workloads:
//! their scaling policy, the observed status, the stabilization cooldowns
//! and the event history. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

use tideline_core::{ConfigError, WorkloadConfig};

pub use tideline_core::{MetricKind, ScaleDirection};

/// Unique identifier for a workload (`{namespace}/{name}`).
pub type WorkloadId = String;

/// Unique identifier for a replica within a workload.
pub type ReplicaId = String;

// ── Workload ──────────────────────────────────────────────────────

/// Scaling policy attached to a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSpec {
    pub id: WorkloadId,
    pub namespace: String,
    pub name: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Target average utilization in percent of the request. For custom
    /// metrics this is the target per-replica average value.
    pub target_utilization_percent: f64,
    pub metric: MetricKind,
    #[serde(default)]
    pub behavior: ScalingBehavior,
    /// Inactive workloads are kept but never evaluated.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    pub updated_at: u64,
}

fn default_active() -> bool {
    true
}

/// Rate limits and hysteresis for one workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingBehavior {
    /// Ratio band around 1.0 inside which no scaling happens.
    pub tolerance: f64,
    pub scale_up: ScalingRules,
    pub scale_down: ScalingRules,
}

/// Rules for one scaling direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingRules {
    /// Cooldown after an accepted action in this direction.
    pub stabilization_window_secs: u64,
    /// Maximum change per cycle, as a percentage of current replicas.
    pub max_change_percent: u32,
}

impl ScalingBehavior {
    pub const DEFAULT_TOLERANCE: f64 = 0.1;
}

impl Default for ScalingBehavior {
    /// Scale up fast, scale down slow.
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
            scale_up: ScalingRules {
                stabilization_window_secs: 30,
                max_change_percent: 100,
            },
            scale_down: ScalingRules {
                stabilization_window_secs: 300,
                max_change_percent: 50,
            },
        }
    }
}

impl WorkloadSpec {
    /// Build a spec from a `[[workloads]]` config entry.
    ///
    /// Only parsing happens here; range checks belong to registration.
    pub fn from_config(cfg: &WorkloadConfig, now: u64) -> Result<Self, ConfigError> {
        let metric: MetricKind = cfg
            .metric
            .parse()
            .map_err(|e: String| ConfigError::Invalid(format!("{}/{}: {e}", cfg.namespace, cfg.name)))?;

        let mut behavior = ScalingBehavior::default();
        if let Some(tolerance) = cfg.tolerance {
            behavior.tolerance = tolerance;
        }
        if let Some(up) = &cfg.scale_up {
            if let Some(window) = up.window()? {
                behavior.scale_up.stabilization_window_secs = window.as_secs();
            }
            if let Some(pct) = up.max_change_percent {
                behavior.scale_up.max_change_percent = pct;
            }
        }
        if let Some(down) = &cfg.scale_down {
            if let Some(window) = down.window()? {
                behavior.scale_down.stabilization_window_secs = window.as_secs();
            }
            if let Some(pct) = down.max_change_percent {
                behavior.scale_down.max_change_percent = pct;
            }
        }

        Ok(Self {
            id: format!("{}/{}", cfg.namespace, cfg.name),
            namespace: cfg.namespace.clone(),
            name: cfg.name.clone(),
            min_replicas: cfg.min_replicas,
            max_replicas: cfg.max_replicas,
            target_utilization_percent: cfg.target_utilization_percent,
            metric,
            behavior,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build the composite key for the workloads table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Clamp a replica count into `[min_replicas, max_replicas]`.
    pub fn clamp_replicas(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replicas, self.max_replicas.max(self.min_replicas))
    }
}

/// Observed state of a workload, mutated by the engine after each cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadStatus {
    pub workload_id: WorkloadId,
    /// Replica count last observed on (or applied to) the scale target.
    pub current_replicas: u32,
    /// Replica count of the last approved decision.
    pub desired_replicas: u32,
    pub last_utilization_percent: Option<f64>,
    /// The last approved decision; stays in effect until replaced.
    pub last_decision: Option<ScalingDecision>,
    /// Unix timestamp of the last successful scale action.
    pub last_scale_at: Option<u64>,
    /// Set when a fatal error disabled further cycles.
    pub disabled_reason: Option<String>,
    /// Cycles skipped because of the deadline or a busy slot.
    pub missed_cycles: u64,
    pub updated_at: u64,
}

impl WorkloadStatus {
    pub fn new(workload_id: &str, now: u64) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            current_replicas: 0,
            desired_replicas: 0,
            last_utilization_percent: None,
            last_decision: None,
            last_scale_at: None,
            disabled_reason: None,
            missed_cycles: 0,
            updated_at: now,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_reason.is_some()
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// One resource usage reading for one replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub workload_id: WorkloadId,
    pub replica_id: ReplicaId,
    pub kind: MetricKind,
    /// Usage in the metric's unit (millicores, bytes, or custom).
    pub raw_value: f64,
    /// Resource request in the same unit, if the replica sets one.
    pub requested_value: Option<f64>,
    /// Whether the replica was ready when sampled.
    pub ready: bool,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

/// Aggregated utilization over a sample window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilizationSnapshot {
    pub workload_id: WorkloadId,
    pub kind: MetricKind,
    /// Utilization percent (or custom average value).
    pub aggregated_value: f64,
    /// Samples that contributed to the value.
    pub sample_count: usize,
    /// Replicas that contributed to the value.
    pub replica_count: usize,
    pub window_start: u64,
    pub window_end: u64,
}

// ── Decisions ─────────────────────────────────────────────────────

/// Desired replica count computed for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub workload_id: WorkloadId,
    pub current_replicas: u32,
    /// Always within `[min_replicas, max_replicas]`.
    pub desired_replicas: u32,
    pub direction: ScaleDirection,
    pub reason: String,
    pub utilization_percent: f64,
    pub decided_at: u64,
}

impl ScalingDecision {
    /// Whether applying this decision changes the replica count.
    pub fn is_change(&self) -> bool {
        self.direction != ScaleDirection::None
    }
}

/// Cooldown bookkeeping for the two scaling channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StabilizationState {
    pub workload_id: WorkloadId,
    pub last_scale_up_at: Option<u64>,
    pub last_scale_down_at: Option<u64>,
}

impl StabilizationState {
    pub fn new(workload_id: &str) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            ..Self::default()
        }
    }
}

// ── Events ────────────────────────────────────────────────────────

/// What happened to a workload, for the event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registered,
    Deactivated,
    Suppressed,
    Scaled,
    Skipped,
    Failed,
    Missed,
    Disabled,
}

/// One entry of a workload's event history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleEvent {
    pub workload_id: WorkloadId,
    /// Unix timestamp (seconds).
    pub at: u64,
    pub kind: EventKind,
    pub message: String,
}

impl ScaleEvent {
    pub fn new(workload_id: &str, at: u64, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            at,
            kind,
            message: message.into(),
        }
    }

    /// Build the composite key for the events table.
    pub fn table_key(&self, seq: u64) -> String {
        format!("{}:{:020}:{:020}", self.workload_id, self.at, seq)
    }
}
