//! REST API handlers.
//!
//! Reads go straight to the `StateStore`; anything that changes what the
//! autoscaler evaluates goes through the `WorkloadRegistry`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::warn;

use tideline_autoscale::{AutoscaleError, EVENT_HISTORY_LIMIT, epoch_secs};
use tideline_core::WorkloadConfig;
use tideline_state::{MetricKind, MetricSample, WorkloadSpec};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn autoscale_error(e: &AutoscaleError) -> axum::response::Response {
    let status = match e {
        AutoscaleError::InvalidConfiguration { .. } | AutoscaleError::InvalidSample { .. } => {
            StatusCode::BAD_REQUEST
        }
        AutoscaleError::WorkloadNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "request failed");
    }
    error_response(&e.to_string(), status).into_response()
}

fn workload_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Workloads ──────────────────────────────────────────────────

/// GET /api/v1/workloads
pub async fn list_workloads(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_workloads() {
        Ok(workloads) => ApiResponse::ok(workloads).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/workloads/{namespace}/{name}
pub async fn get_workload(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_workload(&workload_id(&namespace, &name)) {
        Ok(Some(spec)) => ApiResponse::ok(spec).into_response(),
        Ok(None) => error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/workloads
///
/// Takes the same shape as a `[[workloads]]` config entry.
pub async fn register_workload(
    State(state): State<ApiState>,
    Json(cfg): Json<WorkloadConfig>,
) -> impl IntoResponse {
    let now = epoch_secs();
    let spec = match WorkloadSpec::from_config(&cfg, now) {
        Ok(spec) => spec,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };
    match state.registry.register(spec, now).await {
        Ok(spec) => (StatusCode::CREATED, ApiResponse::ok(spec)).into_response(),
        Err(e) => autoscale_error(&e),
    }
}

/// DELETE /api/v1/workloads/{namespace}/{name}
pub async fn deactivate_workload(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state
        .registry
        .deactivate(&workload_id(&namespace, &name), epoch_secs())
        .await
    {
        Ok(spec) => ApiResponse::ok(spec).into_response(),
        Err(e) => autoscale_error(&e),
    }
}

// ── Status & events ────────────────────────────────────────────

/// GET /api/v1/workloads/{namespace}/{name}/status
pub async fn get_status(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_status(&workload_id(&namespace, &name)) {
        Ok(Some(status)) => ApiResponse::ok(status).into_response(),
        Ok(None) => error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/workloads/{namespace}/{name}/events
pub async fn list_events(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let id = workload_id(&namespace, &name);
    match state.store.get_workload(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
        }
    }
    let limit = query.limit.unwrap_or(50).clamp(1, EVENT_HISTORY_LIMIT);
    match state.store.list_events(&id, limit) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Samples ────────────────────────────────────────────────────

/// One pushed reading. The workload comes from the path.
#[derive(Debug, Deserialize)]
pub struct PushedSample {
    pub replica_id: String,
    /// `cpu`, `memory` or `custom:<name>`; defaults to the workload's metric.
    pub metric: Option<String>,
    pub raw_value: f64,
    pub requested_value: Option<f64>,
    #[serde(default = "default_ready")]
    pub ready: bool,
    /// Defaults to the time of receipt.
    pub timestamp: Option<u64>,
}

fn default_ready() -> bool {
    true
}

/// POST /api/v1/workloads/{namespace}/{name}/samples
pub async fn push_samples(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(pushed): Json<Vec<PushedSample>>,
) -> impl IntoResponse {
    let id = workload_id(&namespace, &name);
    let spec = match state.store.get_workload(&id) {
        Ok(Some(spec)) if spec.active => spec,
        Ok(_) => return error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
        }
    };

    let now = epoch_secs();
    let mut samples = Vec::with_capacity(pushed.len());
    for p in pushed {
        if !p.raw_value.is_finite() || p.raw_value < 0.0 {
            return error_response(
                &format!("replica {}: raw_value must be a non-negative number", p.replica_id),
                StatusCode::BAD_REQUEST,
            )
            .into_response();
        }
        let kind = match p.metric.as_deref().map(str::parse::<MetricKind>) {
            None => spec.metric.clone(),
            Some(Ok(kind)) => kind,
            Some(Err(e)) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
        };
        samples.push(MetricSample {
            workload_id: id.clone(),
            replica_id: p.replica_id,
            kind,
            raw_value: p.raw_value,
            requested_value: p.requested_value,
            ready: p.ready,
            timestamp: p.timestamp.unwrap_or(now),
        });
    }

    match state.registry.record_samples(&id, samples).await {
        Ok(accepted) => {
            (StatusCode::ACCEPTED, ApiResponse::ok(serde_json::json!({ "accepted": accepted })))
                .into_response()
        }
        Err(e) => autoscale_error(&e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let workloads = state.store.list_workloads().unwrap_or_default();
    let statuses = state.store.list_statuses().unwrap_or_default();

    let body = tideline_metrics::render_prometheus(&workloads, &statuses);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tideline_autoscale::WorkloadRegistry;
    use tideline_state::StateStore;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState {
            registry: Arc::new(WorkloadRegistry::new(store.clone())),
            store,
        }
    }

    fn test_config(name: &str) -> WorkloadConfig {
        WorkloadConfig {
            namespace: "default".to_string(),
            name: name.to_string(),
            min_replicas: 1,
            max_replicas: 10,
            target_utilization_percent: 70.0,
            metric: "cpu".to_string(),
            tolerance: None,
            scale_up: None,
            scale_down: None,
        }
    }

    fn path(name: &str) -> Path<(String, String)> {
        Path(("default".to_string(), name.to_string()))
    }

    #[tokio::test]
    async fn list_workloads_empty() {
        let resp = list_workloads(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_and_get_workload() {
        let state = test_state();
        let resp = register_workload(State(state.clone()), Json(test_config("api")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_workload(State(state.clone()), path("api")).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.registry.len().await, 1);
    }

    #[tokio::test]
    async fn register_rejects_invalid_bounds() {
        let state = test_state();
        let mut cfg = test_config("api");
        cfg.min_replicas = 8;
        cfg.max_replicas = 4;
        let resp = register_workload(State(state.clone()), Json(cfg)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_workloads().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_names_that_are_not_labels() {
        let state = test_state();
        for name in ["b/c", "Api", "a:x"] {
            let resp = register_workload(State(state.clone()), Json(test_config(name)))
                .await
                .into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{name}");
        }
        assert!(state.store.list_workloads().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_unknown_metric() {
        let mut cfg = test_config("api");
        cfg.metric = "gpu".to_string();
        let resp = register_workload(State(test_state()), Json(cfg)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_workload() {
        let resp = get_workload(State(test_state()), path("nope")).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deactivate_existing_and_missing() {
        let state = test_state();
        register_workload(State(state.clone()), Json(test_config("api"))).await;

        let resp = deactivate_workload(State(state.clone()), path("api")).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let stored = state.store.get_workload("default/api").unwrap().unwrap();
        assert!(!stored.active);

        let resp = deactivate_workload(State(state), path("nope")).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_available_after_registration() {
        let state = test_state();
        let resp = get_status(State(state.clone()), path("api")).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        register_workload(State(state.clone()), Json(test_config("api"))).await;
        let resp = get_status(State(state), path("api")).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn push_samples_queues_for_workload() {
        let state = test_state();
        register_workload(State(state.clone()), Json(test_config("api"))).await;

        let pushed = vec![PushedSample {
            replica_id: "api-0".to_string(),
            metric: None,
            raw_value: 250.0,
            requested_value: Some(500.0),
            ready: true,
            timestamp: Some(10),
        }];
        let resp = push_samples(State(state.clone()), path("api"), Json(pushed))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let handle = state.registry.get("default/api").await.unwrap();
        let queued = handle.take_pushed().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, MetricKind::Cpu);
        assert_eq!(queued[0].workload_id, "default/api");
    }

    #[tokio::test]
    async fn push_samples_rejects_negative_values() {
        let state = test_state();
        register_workload(State(state.clone()), Json(test_config("api"))).await;
        let pushed = vec![PushedSample {
            replica_id: "api-0".to_string(),
            metric: None,
            raw_value: -1.0,
            requested_value: None,
            ready: true,
            timestamp: None,
        }];
        let resp = push_samples(State(state), path("api"), Json(pushed)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn push_samples_rejects_unknown_metric() {
        let state = test_state();
        register_workload(State(state.clone()), Json(test_config("api"))).await;
        let pushed = vec![PushedSample {
            replica_id: "api-0".to_string(),
            metric: Some("gpu".to_string()),
            raw_value: 1.0,
            requested_value: None,
            ready: true,
            timestamp: None,
        }];
        let resp = push_samples(State(state), path("api"), Json(pushed)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn push_samples_to_unknown_workload() {
        let resp = push_samples(State(test_state()), path("nope"), Json(vec![]))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
