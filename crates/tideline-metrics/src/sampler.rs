//! Metric sampling: per-workload sample windows fed by pull sources and
//! pushed samples.
//!
//! A [`SampleWindow`] belongs to exactly one workload and is owned by that
//! workload's slot in the registry, so no locking happens here.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tideline_state::{MetricKind, MetricSample, WorkloadId, WorkloadSpec};

use crate::error::MetricsError;
use crate::source::MetricsSource;

/// Hard cap on samples held per workload; the oldest are evicted first.
pub const MAX_WINDOW_SAMPLES: usize = 4096;

/// Samples recorded for one workload, ordered by arrival.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    workload_id: WorkloadId,
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(workload_id: &str) -> Self {
        Self::with_capacity(workload_id, MAX_WINDOW_SAMPLES)
    }

    pub fn with_capacity(workload_id: &str, capacity: usize) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            samples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn workload_id(&self) -> &str {
        &self.workload_id
    }

    /// Record one sample. Samples of another workload are rejected.
    pub fn record(&mut self, sample: MetricSample) -> Result<(), MetricsError> {
        if sample.workload_id != self.workload_id {
            return Err(MetricsError::ForeignSample {
                expected: self.workload_id.clone(),
                got: sample.workload_id,
            });
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Record a batch. Stops at the first foreign sample; earlier samples stay.
    pub fn record_all(
        &mut self,
        samples: impl IntoIterator<Item = MetricSample>,
    ) -> Result<usize, MetricsError> {
        let mut recorded = 0;
        for sample in samples {
            self.record(sample)?;
            recorded += 1;
        }
        Ok(recorded)
    }

    /// Drop samples with a timestamp before `cutoff`. Returns how many went.
    pub fn prune(&mut self, cutoff: u64) -> usize {
        let before = self.samples.len();
        self.samples.retain(|s| s.timestamp >= cutoff);
        before - self.samples.len()
    }

    /// Retained samples of `kind`, in arrival order.
    pub fn samples(&self, kind: &MetricKind) -> Vec<MetricSample> {
        self.samples
            .iter()
            .filter(|s| &s.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Polls the configured metrics source and maintains sample retention.
pub struct MetricSampler {
    source: Option<Arc<dyn MetricsSource>>,
    retention: Duration,
}

impl MetricSampler {
    /// A push-only sampler: windows are fed exclusively by recorded samples.
    pub fn new(retention: Duration) -> Self {
        Self {
            source: None,
            retention,
        }
    }

    pub fn with_source(source: Arc<dyn MetricsSource>, retention: Duration) -> Self {
        Self {
            source: Some(source),
            retention,
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Poll the source (if any) into `window`, discard expired samples, and
    /// return what remains for the workload's metric kind.
    pub async fn sample(
        &self,
        workload: &WorkloadSpec,
        window: &mut SampleWindow,
        now: u64,
    ) -> Result<Vec<MetricSample>, MetricsError> {
        if let Some(source) = &self.source {
            let fetched = source.fetch(workload, now).await?;
            let mut accepted = 0usize;
            for sample in fetched {
                match window.record(sample) {
                    Ok(()) => accepted += 1,
                    Err(e) => warn!(workload = %workload.id, error = %e, "dropping sample"),
                }
            }
            debug!(workload = %workload.id, accepted, "samples recorded from source");
        }

        let cutoff = now.saturating_sub(self.retention.as_secs());
        let pruned = window.prune(cutoff);
        if pruned > 0 {
            debug!(workload = %workload.id, pruned, "expired samples discarded");
        }

        Ok(window.samples(&workload.metric))
    }
}
