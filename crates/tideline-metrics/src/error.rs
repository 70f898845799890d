//! Metrics error types.

use thiserror::Error;

use tideline_state::MetricKind;

/// Errors raised while collecting samples.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The metrics backend could not be reached.
    #[error("metrics backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something we could not use.
    #[error("invalid metrics response: {0}")]
    InvalidResponse(String),

    #[error("sample for workload {got} recorded into window of {expected}")]
    ForeignSample { expected: String, got: String },
}

/// Errors raised while aggregating samples.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    /// No ready replica with a usable sample remained.
    #[error("insufficient data for {workload_id} ({kind}): {samples} samples, no usable ready replica")]
    InsufficientData {
        workload_id: String,
        kind: MetricKind,
        samples: usize,
    },
}
