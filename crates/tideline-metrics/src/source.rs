//! Pull backends for replica metrics.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use http::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use tideline_state::{MetricKind, MetricSample, WorkloadSpec};

use crate::error::MetricsError;
use crate::client::{self, HttpError, HttpResponse};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A metrics backend the sampler can poll.
pub trait MetricsSource: Send + Sync {
    /// Fetch one sample per replica of `workload` for its metric kind.
    fn fetch<'a>(
        &'a self,
        workload: &'a WorkloadSpec,
        now: u64,
    ) -> BoxFuture<'a, Result<Vec<MetricSample>, MetricsError>>;
}

/// One replica as listed by the metrics API.
#[derive(Debug, Deserialize)]
struct PodEntry {
    id: String,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    requests: PodRequests,
}

#[derive(Debug, Default, Deserialize)]
struct PodRequests {
    /// Millicores.
    cpu: Option<f64>,
    /// Bytes.
    memory: Option<f64>,
}

/// `GET /pods/{id}/metrics` body.
#[derive(Debug, Deserialize)]
struct PodUsage {
    cpu: Option<f64>,
    memory: Option<f64>,
    #[serde(default)]
    custom: HashMap<String, f64>,
}

/// Metrics API client modelled on `metrics.k8s.io`.
///
/// ```text
/// GET /namespaces/{ns}/workloads/{name}/pods  → [{id, ready, requests: {cpu, memory}}]
/// GET /pods/{id}/metrics                       → {cpu: <millicores>, memory: <bytes>, custom: {..}}
/// ```
pub struct HttpMetricsSource {
    endpoint: String,
    timeout: Duration,
}

impl HttpMetricsSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            timeout,
        }
    }

    async fn get(&self, path: &str) -> Result<HttpResponse, MetricsError> {
        client::send(&self.endpoint, Method::GET, path, None, self.timeout)
            .await
            .map_err(|e: HttpError| MetricsError::Unavailable(e.to_string()))
    }

    async fn fetch_samples(
        &self,
        workload: &WorkloadSpec,
        now: u64,
    ) -> Result<Vec<MetricSample>, MetricsError> {
        let list_path = format!(
            "/namespaces/{}/workloads/{}/pods",
            workload.namespace, workload.name
        );
        let resp = self.get(&list_path).await?;
        if !resp.status.is_success() {
            return Err(status_error(&list_path, resp.status));
        }
        let pods: Vec<PodEntry> = resp
            .json()
            .map_err(|e| MetricsError::InvalidResponse(format!("{list_path}: {e}")))?;

        let mut samples = Vec::with_capacity(pods.len());
        for pod in pods {
            let path = format!("/pods/{}/metrics", pod.id);
            let resp = self.get(&path).await?;
            if resp.status == StatusCode::NOT_FOUND {
                // Replica went away between the listing and the read.
                debug!(workload = %workload.id, pod = %pod.id, "no metrics for replica");
                continue;
            }
            if !resp.status.is_success() {
                return Err(status_error(&path, resp.status));
            }
            let usage: PodUsage = resp
                .json()
                .map_err(|e| MetricsError::InvalidResponse(format!("{path}: {e}")))?;

            let (raw_value, requested_value) = match &workload.metric {
                MetricKind::Cpu => (usage.cpu, pod.requests.cpu),
                MetricKind::Memory => (usage.memory, pod.requests.memory),
                MetricKind::Custom(name) => (usage.custom.get(name).copied(), None),
            };
            // A replica that does not report the metric is left out, not read as zero.
            let Some(raw_value) = raw_value else {
                debug!(
                    workload = %workload.id,
                    pod = %pod.id,
                    metric = %workload.metric,
                    "metric not reported"
                );
                continue;
            };

            samples.push(MetricSample {
                workload_id: workload.id.clone(),
                replica_id: pod.id,
                kind: workload.metric.clone(),
                raw_value,
                requested_value,
                ready: pod.ready,
                timestamp: now,
            });
        }

        debug!(workload = %workload.id, samples = samples.len(), "metrics fetched");
        Ok(samples)
    }
}

impl MetricsSource for HttpMetricsSource {
    fn fetch<'a>(
        &'a self,
        workload: &'a WorkloadSpec,
        now: u64,
    ) -> BoxFuture<'a, Result<Vec<MetricSample>, MetricsError>> {
        Box::pin(self.fetch_samples(workload, now))
    }
}

fn status_error(path: &str, status: StatusCode) -> MetricsError {
    if status.is_server_error() {
        MetricsError::Unavailable(format!("{path}: {status}"))
    } else {
        MetricsError::InvalidResponse(format!("{path}: {status}"))
    }
}
