//! Autoscaler error taxonomy.

use thiserror::Error;

use tideline_metrics::{AggregateError, MetricsError};
use tideline_state::StateError;

use crate::executor::ExecutionError;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// Transient: the metrics backend could not be read this cycle.
    #[error("metrics unavailable for {workload_id}: {source}")]
    MetricsUnavailable {
        workload_id: String,
        #[source]
        source: MetricsError,
    },

    /// No usable ready replica; no decision is taken.
    #[error(transparent)]
    InsufficientData(#[from] AggregateError),

    /// Transient scale-target failure that outlived its retries.
    #[error("scale of {workload_id} conflicted after {attempts} attempts: {reason}")]
    ExecutionConflict {
        workload_id: String,
        attempts: u32,
        reason: String,
    },

    /// The scale target refused the request outright.
    #[error("scale of {workload_id} rejected: {reason}")]
    ExecutionRejected { workload_id: String, reason: String },

    /// Fatal for the workload: its slot is disabled until re-registered.
    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("invalid configuration for {workload_id}: {reason}")]
    InvalidConfiguration { workload_id: String, reason: String },

    #[error("invalid sample for {workload_id}: {reason}")]
    InvalidSample { workload_id: String, reason: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl AutoscaleError {
    pub(crate) fn invalid(workload_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            workload_id: workload_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the cycle should be skipped quietly rather than counted as a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::MetricsUnavailable { .. } | Self::InsufficientData(_))
    }
}

impl From<ExecutionError> for AutoscaleError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Exhausted {
                workload_id,
                attempts,
                last,
            } => Self::ExecutionConflict {
                workload_id,
                attempts,
                reason: last,
            },
            ExecutionError::NotFound(workload_id) => Self::WorkloadNotFound(workload_id),
            ExecutionError::Rejected {
                workload_id,
                reason,
            } => Self::ExecutionRejected {
                workload_id,
                reason,
            },
        }
    }
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
