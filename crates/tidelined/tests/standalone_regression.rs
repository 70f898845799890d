//! Standalone regression tests.
//!
//! Validates the daemon's surfaces end to end: the API router over a real
//! registry and store, and pushed samples driving the autoscaler through
//! one full cycle.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tideline_api::build_router;
use tideline_autoscale::{
    Autoscaler, CycleContext, CycleOutcome, DryRunScaleTarget, EngineSettings, RetryPolicy,
    ScaleExecutor, ScalingDecisionEngine, WorkloadRegistry, epoch_secs,
};
use tideline_core::AggregationPolicy;
use tideline_metrics::{MetricSampler, build_aggregator};
use tideline_state::StateStore;

const WORKLOAD: &str = r#"{
    "namespace": "default",
    "name": "api",
    "min_replicas": 1,
    "max_replicas": 10,
    "target_utilization_percent": 40.0
}"#;

fn test_registry() -> Arc<WorkloadRegistry> {
    Arc::new(WorkloadRegistry::new(StateStore::open_in_memory().unwrap()))
}

async fn send(router: &axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn standalone_api_list_workloads_empty() {
    let router = build_router(test_registry());

    let (status, body) = send(&router, get("/api/v1/workloads")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn standalone_api_register_and_get_workload() {
    let router = build_router(test_registry());

    let (status, body) = send(&router, post_json("/api/v1/workloads", WORKLOAD)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "default/api");

    let (status, body) = send(&router, get("/api/v1/workloads/default/api")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["max_replicas"], 10);
    assert_eq!(body["data"]["active"], true);
}

#[tokio::test]
async fn standalone_api_rejects_invalid_workload() {
    let router = build_router(test_registry());

    let body = r#"{"name":"api","min_replicas":5,"max_replicas":2,"target_utilization_percent":50}"#;
    let (status, body) = send(&router, post_json("/api/v1/workloads", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("min_replicas"));
}

#[tokio::test]
async fn standalone_api_deactivate_keeps_record() {
    let router = build_router(test_registry());
    send(&router, post_json("/api/v1/workloads", WORKLOAD)).await;

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/v1/workloads/default/api")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, req).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, get("/api/v1/workloads/default/api")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], false);

    let (_, body) = send(&router, get("/api/v1/workloads/default/api/events")).await;
    let kinds: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"registered"));
    assert!(kinds.contains(&"deactivated"));
}

#[tokio::test]
async fn standalone_api_unknown_workload_is_404() {
    let router = build_router(test_registry());

    let (status, _) = send(&router, get("/api/v1/workloads/default/nope/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, get("/api/v1/workloads/default/nope/events")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let samples = r#"[{"replica_id":"nope-0","raw_value":1.0}]"#;
    let (status, _) = send(
        &router,
        post_json("/api/v1/workloads/default/nope/samples", samples),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_api_metrics_endpoint() {
    let registry = test_registry();
    let router = build_router(registry.clone());
    send(&router, post_json("/api/v1/workloads", WORKLOAD)).await;

    let resp = router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tideline_max_replicas{workload=\"default/api\"} 10"));
}

#[tokio::test]
async fn standalone_pushed_samples_drive_a_scale_up() {
    let registry = test_registry();
    let store = registry.store().clone();
    let target = Arc::new(DryRunScaleTarget::new());
    target.set("default/api", 2).await;

    let ctx = CycleContext {
        store: store.clone(),
        sampler: MetricSampler::new(Duration::from_secs(75)),
        aggregator: build_aggregator(&AggregationPolicy::Mean),
        engine: ScalingDecisionEngine::new(),
        executor: ScaleExecutor::new(target.clone(), RetryPolicy::default()),
    };
    let autoscaler = Autoscaler::new(registry.clone(), Arc::new(ctx), EngineSettings::default());
    let router = build_router(registry);

    let (status, _) = send(&router, post_json("/api/v1/workloads", WORKLOAD)).await;
    assert_eq!(status, StatusCode::CREATED);

    // Two replicas at 80% of their CPU request against a 40% target.
    let samples = r#"[
        {"replica_id":"api-0","raw_value":400.0,"requested_value":500.0},
        {"replica_id":"api-1","raw_value":400.0,"requested_value":500.0}
    ]"#;
    let (status, body) = send(
        &router,
        post_json("/api/v1/workloads/default/api/samples", samples),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["accepted"], 2);

    let outcomes = autoscaler.evaluate_all_at(epoch_secs()).await;
    assert_eq!(
        outcomes,
        vec![("default/api".to_string(), CycleOutcome::Scaled { from: 2, to: 4 })]
    );
    assert_eq!(target.replicas("default/api").await, Some(4));

    let (status, body) = send(&router, get("/api/v1/workloads/default/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_replicas"], 4);
    assert_eq!(body["data"]["last_decision"]["desired_replicas"], 4);

    let (_, body) = send(&router, get("/api/v1/workloads/default/api/events?limit=10")).await;
    let scaled = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "scaled")
        .count();
    assert_eq!(scaled, 1);
}
