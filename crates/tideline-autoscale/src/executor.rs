//! Applying decisions to a workload's scale subresource.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tideline_metrics::BoxFuture;
use tideline_metrics::client::{self, HttpResponse};
use tideline_state::ScalingDecision;

/// Failure reported by a [`ScaleTarget`] for a single attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScaleTargetError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl ScaleTargetError {
    /// Conflicts and unavailability are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable(_))
    }
}

/// Failure of a whole executor operation, after retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("{workload_id}: gave up after {attempts} attempts: {last}")]
    Exhausted {
        workload_id: String,
        attempts: u32,
        last: String,
    },

    #[error("{0}: scale target not found")]
    NotFound(String),

    #[error("{workload_id}: {reason}")]
    Rejected { workload_id: String, reason: String },
}

/// Acknowledgement of an applied replica count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub workload_id: String,
    pub replicas: u32,
    pub attempts: u32,
}

/// The scale subresource of workloads, addressed by `{namespace}/{name}`.
pub trait ScaleTarget: Send + Sync {
    fn get_scale<'a>(&'a self, workload_id: &'a str) -> BoxFuture<'a, Result<u32, ScaleTargetError>>;

    /// Set the replica count; returns the count the target reports back.
    fn patch_scale<'a>(
        &'a self,
        workload_id: &'a str,
        replicas: u32,
    ) -> BoxFuture<'a, Result<u32, ScaleTargetError>>;
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base doubled per
    /// attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Writes decisions through a [`ScaleTarget`] with retries.
pub struct ScaleExecutor {
    target: Arc<dyn ScaleTarget>,
    retry: RetryPolicy,
}

impl ScaleExecutor {
    pub fn new(target: Arc<dyn ScaleTarget>, retry: RetryPolicy) -> Self {
        Self { target, retry }
    }

    /// Apply the decision's desired replica count.
    pub async fn apply(&self, decision: &ScalingDecision) -> Result<Ack, ExecutionError> {
        let workload_id = decision.workload_id.as_str();
        let desired = decision.desired_replicas;
        let (replicas, attempts) = self
            .with_retry(workload_id, "patch", || {
                self.target.patch_scale(workload_id, desired)
            })
            .await?;

        info!(
            workload = %workload_id,
            from = decision.current_replicas,
            to = replicas,
            attempts,
            "scale applied"
        );
        Ok(Ack {
            workload_id: workload_id.to_string(),
            replicas,
            attempts,
        })
    }

    /// Read the current replica count.
    pub async fn observe(&self, workload_id: &str) -> Result<u32, ExecutionError> {
        let (replicas, _) = self
            .with_retry(workload_id, "get", || self.target.get_scale(workload_id))
            .await?;
        Ok(replicas)
    }

    async fn with_retry<'a, F>(
        &self,
        workload_id: &str,
        op: &'static str,
        mut call: F,
    ) -> Result<(u32, u32), ExecutionError>
    where
        F: FnMut() -> BoxFuture<'a, Result<u32, ScaleTargetError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(replicas) => return Ok((replicas, attempt)),
                Err(ScaleTargetError::NotFound(_)) => {
                    warn!(workload = %workload_id, op, "scale target not found");
                    return Err(ExecutionError::NotFound(workload_id.to_string()));
                }
                Err(ScaleTargetError::Rejected(reason)) => {
                    warn!(workload = %workload_id, op, %reason, "scale request rejected");
                    return Err(ExecutionError::Rejected {
                        workload_id: workload_id.to_string(),
                        reason,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(workload = %workload_id, op, attempts = attempt, error = %e, "retries exhausted");
                    return Err(ExecutionError::Exhausted {
                        workload_id: workload_id.to_string(),
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        workload = %workload_id,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient scale failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// `{"replicas": N}` body of the scale subresource.
#[derive(Debug, Serialize, Deserialize)]
struct Scale {
    replicas: u32,
}

/// Scale subresource over HTTP.
///
/// ```text
/// GET   /namespaces/{ns}/workloads/{name}/scale   → {"replicas": N}
/// PATCH /namespaces/{ns}/workloads/{name}/scale   ← {"replicas": N}
/// ```
pub struct HttpScaleTarget {
    endpoint: String,
    timeout: Duration,
}

impl HttpScaleTarget {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            timeout,
        }
    }

    fn scale_path(workload_id: &str) -> Result<String, ScaleTargetError> {
        let (namespace, name) = workload_id
            .split_once('/')
            .ok_or_else(|| ScaleTargetError::Rejected(format!("malformed workload id {workload_id}")))?;
        Ok(format!("/namespaces/{namespace}/workloads/{name}/scale"))
    }

    async fn request(
        &self,
        workload_id: &str,
        method: Method,
        body: Option<Vec<u8>>,
    ) -> Result<u32, ScaleTargetError> {
        let path = Self::scale_path(workload_id)?;
        let resp = client::send(&self.endpoint, method, &path, body, self.timeout)
            .await
            .map_err(|e| ScaleTargetError::Unavailable(e.to_string()))?;
        decode_scale(&path, &resp)
    }
}

fn decode_scale(path: &str, resp: &HttpResponse) -> Result<u32, ScaleTargetError> {
    let status = resp.status;
    if status.is_success() {
        return resp
            .json::<Scale>()
            .map(|s| s.replicas)
            .map_err(|e| ScaleTargetError::Rejected(format!("{path}: bad scale body: {e}")));
    }
    let detail = format!("{path}: {status}");
    Err(match status {
        StatusCode::CONFLICT => ScaleTargetError::Conflict(detail),
        StatusCode::NOT_FOUND => ScaleTargetError::NotFound(detail),
        s if s.is_server_error() => ScaleTargetError::Unavailable(detail),
        _ => ScaleTargetError::Rejected(detail),
    })
}

impl ScaleTarget for HttpScaleTarget {
    fn get_scale<'a>(&'a self, workload_id: &'a str) -> BoxFuture<'a, Result<u32, ScaleTargetError>> {
        Box::pin(self.request(workload_id, Method::GET, None))
    }

    fn patch_scale<'a>(
        &'a self,
        workload_id: &'a str,
        replicas: u32,
    ) -> BoxFuture<'a, Result<u32, ScaleTargetError>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&Scale { replicas })
                .map_err(|e| ScaleTargetError::Rejected(e.to_string()))?;
            self.request(workload_id, Method::PATCH, Some(body)).await
        })
    }
}

/// In-memory scale target for running without a cluster. Unknown workloads
/// report zero replicas until first patched.
#[derive(Default)]
pub struct DryRunScaleTarget {
    replicas: RwLock<HashMap<String, u32>>,
}

impl DryRunScaleTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, workload_id: &str, replicas: u32) {
        self.replicas
            .write()
            .await
            .insert(workload_id.to_string(), replicas);
    }

    pub async fn replicas(&self, workload_id: &str) -> Option<u32> {
        self.replicas.read().await.get(workload_id).copied()
    }
}

impl ScaleTarget for DryRunScaleTarget {
    fn get_scale<'a>(&'a self, workload_id: &'a str) -> BoxFuture<'a, Result<u32, ScaleTargetError>> {
        Box::pin(async move { Ok(self.replicas(workload_id).await.unwrap_or(0)) })
    }

    fn patch_scale<'a>(
        &'a self,
        workload_id: &'a str,
        replicas: u32,
    ) -> BoxFuture<'a, Result<u32, ScaleTargetError>> {
        Box::pin(async move {
            self.set(workload_id, replicas).await;
            debug!(workload = %workload_id, replicas, "dry-run scale recorded");
            Ok(replicas)
        })
    }
}
