//! Folding per-replica samples into one utilization signal.
//!
//! Every aggregator shares the same front half: group samples by replica,
//! drop replicas that are not ready (judged by their latest sample) or that
//! lack a usable request, and average each replica's samples over the
//! window. Implementations only differ in how the per-replica values are
//! reduced to one number.

use std::collections::BTreeMap;
use std::sync::Arc;

use tideline_core::AggregationPolicy;
use tideline_state::{MetricKind, MetricSample, UtilizationSnapshot};

use crate::error::AggregateError;

/// Reduces a window of samples into a [`UtilizationSnapshot`].
pub trait UtilizationAggregator: Send + Sync {
    /// Reduce per-replica utilization values. `values` is never empty.
    fn reduce(&self, values: &mut [f64]) -> f64;

    /// Short policy name for logs.
    fn name(&self) -> &'static str;

    fn aggregate(
        &self,
        workload_id: &str,
        samples: &[MetricSample],
        kind: &MetricKind,
    ) -> Result<UtilizationSnapshot, AggregateError> {
        let considered: Vec<&MetricSample> = samples
            .iter()
            .filter(|s| s.workload_id == workload_id && &s.kind == kind)
            .collect();

        let window_start = considered.iter().map(|s| s.timestamp).min().unwrap_or(0);
        let window_end = considered.iter().map(|s| s.timestamp).max().unwrap_or(0);

        let per_replica = per_replica_utilization(&considered, kind);
        if per_replica.is_empty() {
            return Err(AggregateError::InsufficientData {
                workload_id: workload_id.to_string(),
                kind: kind.clone(),
                samples: considered.len(),
            });
        }

        let sample_count = per_replica.iter().map(|(_, n)| n).sum();
        let replica_count = per_replica.len();
        let mut values: Vec<f64> = per_replica.into_iter().map(|(v, _)| v).collect();

        Ok(UtilizationSnapshot {
            workload_id: workload_id.to_string(),
            kind: kind.clone(),
            aggregated_value: self.reduce(&mut values),
            sample_count,
            replica_count,
            window_start,
            window_end,
        })
    }
}

/// Per-replica `(mean utilization, samples used)` for eligible replicas.
fn per_replica_utilization(samples: &[&MetricSample], kind: &MetricKind) -> Vec<(f64, usize)> {
    let mut by_replica: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
    for sample in samples {
        by_replica
            .entry(sample.replica_id.as_str())
            .or_default()
            .push(sample);
    }

    let mut out = Vec::with_capacity(by_replica.len());
    for (_, replica_samples) in by_replica {
        let Some(latest) = replica_samples.iter().max_by_key(|s| s.timestamp) else {
            continue;
        };
        if !latest.ready {
            continue;
        }

        let values: Vec<f64> = replica_samples
            .iter()
            .filter_map(|s| utilization_of(s, kind))
            .collect();
        if values.is_empty() {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        out.push((mean, values.len()));
    }
    out
}

/// Utilization of one sample: percent of request for resources, raw value
/// for custom metrics. `None` when a resource sample has no positive request.
fn utilization_of(sample: &MetricSample, kind: &MetricKind) -> Option<f64> {
    if !sample.raw_value.is_finite() {
        return None;
    }
    if kind.requires_request() {
        match sample.requested_value {
            Some(req) if req > 0.0 && req.is_finite() => Some(sample.raw_value / req * 100.0),
            _ => None,
        }
    } else {
        Some(sample.raw_value)
    }
}

/// Arithmetic mean over replicas.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanAggregator;

impl UtilizationAggregator for MeanAggregator {
    fn reduce(&self, values: &mut [f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn name(&self) -> &'static str {
        "mean"
    }
}

/// Mean after dropping `fraction` of the replicas from each tail.
#[derive(Debug, Clone, Copy)]
pub struct TrimmedMeanAggregator {
    fraction: f64,
}

impl TrimmedMeanAggregator {
    /// `fraction` is clamped to `[0, 0.5)`.
    pub fn new(fraction: f64) -> Self {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 0.49)
        } else {
            0.0
        };
        Self { fraction }
    }
}

impl UtilizationAggregator for TrimmedMeanAggregator {
    fn reduce(&self, values: &mut [f64]) -> f64 {
        values.sort_by(f64::total_cmp);
        let len = values.len();
        let mut cut = (len as f64 * self.fraction).floor() as usize;
        // At least one value survives the trim.
        while cut > 0 && len <= cut * 2 {
            cut -= 1;
        }
        let kept = &values[cut..len - cut];
        kept.iter().sum::<f64>() / kept.len() as f64
    }

    fn name(&self) -> &'static str {
        "trimmed_mean"
    }
}

/// Nearest-rank percentile of per-replica utilization.
#[derive(Debug, Clone, Copy)]
pub struct PercentileAggregator {
    percentile: f64,
}

impl PercentileAggregator {
    /// `percentile` is clamped to `[0, 100]`.
    pub fn new(percentile: f64) -> Self {
        let percentile = if percentile.is_finite() {
            percentile.clamp(0.0, 100.0)
        } else {
            100.0
        };
        Self { percentile }
    }
}

impl UtilizationAggregator for PercentileAggregator {
    fn reduce(&self, values: &mut [f64]) -> f64 {
        values.sort_by(f64::total_cmp);
        let rank = (self.percentile / 100.0 * values.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, values.len()) - 1;
        values[idx]
    }

    fn name(&self) -> &'static str {
        "percentile"
    }
}

/// Build the aggregator selected by configuration.
pub fn build_aggregator(policy: &AggregationPolicy) -> Arc<dyn UtilizationAggregator> {
    match policy {
        AggregationPolicy::Mean => Arc::new(MeanAggregator),
        AggregationPolicy::TrimmedMean { fraction } => {
            Arc::new(TrimmedMeanAggregator::new(*fraction))
        }
        AggregationPolicy::Percentile { percentile } => {
            Arc::new(PercentileAggregator::new(*percentile))
        }
    }
}
