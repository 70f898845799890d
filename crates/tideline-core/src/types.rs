//! Shared types used across Tideline crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The resource a workload scales on.
///
/// Cpu and Memory are measured against the replica's resource request;
/// Custom metrics are compared as raw per-replica averages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Custom(String),
}

impl MetricKind {
    /// Whether utilization for this metric needs a resource request.
    pub fn requires_request(&self) -> bool {
        matches!(self, MetricKind::Cpu | MetricKind::Memory)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Cpu => f.write_str("cpu"),
            MetricKind::Memory => f.write_str("memory"),
            MetricKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cpu" => Ok(MetricKind::Cpu),
            "memory" => Ok(MetricKind::Memory),
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.trim().is_empty() => {
                    Ok(MetricKind::Custom(name.trim().to_string()))
                }
                Some(_) => Err("custom metric needs a name (custom:<name>)".to_string()),
                None => Err(format!("unknown metric {other:?}: expected cpu, memory or custom:<name>")),
            },
        }
    }
}

/// Direction of a scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

impl ScaleDirection {
    /// Direction implied by moving from `current` to `desired` replicas.
    pub fn between(current: u32, desired: u32) -> Self {
        match desired.cmp(&current) {
            std::cmp::Ordering::Greater => ScaleDirection::Up,
            std::cmp::Ordering::Less => ScaleDirection::Down,
            std::cmp::Ordering::Equal => ScaleDirection::None,
        }
    }
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScaleDirection::Up => "up",
            ScaleDirection::Down => "down",
            ScaleDirection::None => "none",
        })
    }
}
