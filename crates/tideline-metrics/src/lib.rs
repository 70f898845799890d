//! tideline-metrics: utilization signals for the autoscaler.
//!
//! Collects per-replica resource samples, folds them into one utilization
//! value per workload, and renders the autoscaler's state for Prometheus.
//!
//! # Architecture
//!
//! ```text
//! MetricSampler
//!   ├── MetricsSource::fetch()  ← pull (HttpMetricsSource, metrics.k8s.io-style)
//!   ├── SampleWindow::record()  ← push (API)
//!   └── sample() → retained samples, older than retention discarded
//!
//! UtilizationAggregator
//!   └── aggregate() → UtilizationSnapshot (mean | trimmed mean | percentile)
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod client;
pub mod error;
pub mod prometheus;
pub mod sampler;
pub mod source;

pub use aggregator::{
    build_aggregator, MeanAggregator, PercentileAggregator, TrimmedMeanAggregator,
    UtilizationAggregator,
};
pub use error::{AggregateError, MetricsError};
pub use prometheus::render_prometheus;
pub use sampler::{MAX_WINDOW_SAMPLES, MetricSampler, SampleWindow};
pub use source::{BoxFuture, HttpMetricsSource, MetricsSource};
