//! tideline-api: REST API for Tideline.
//!
//! Provides axum route handlers for registering workloads, inspecting their
//! autoscaling status and history, and pushing metric samples.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/workloads` | List workloads |
//! | POST | `/api/v1/workloads` | Register a workload |
//! | GET | `/api/v1/workloads/{namespace}/{name}` | Workload spec |
//! | DELETE | `/api/v1/workloads/{namespace}/{name}` | Deactivate a workload |
//! | GET | `/api/v1/workloads/{namespace}/{name}/status` | Status and last decision |
//! | GET | `/api/v1/workloads/{namespace}/{name}/events` | Event history |
//! | POST | `/api/v1/workloads/{namespace}/{name}/samples` | Push metric samples |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tideline_autoscale::WorkloadRegistry;
use tideline_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub registry: Arc<WorkloadRegistry>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(registry: Arc<WorkloadRegistry>) -> Router {
    let api_state = ApiState {
        store: registry.store().clone(),
        registry,
    };

    let api_routes = Router::new()
        .route("/workloads", get(handlers::list_workloads).post(handlers::register_workload))
        .route(
            "/workloads/{namespace}/{name}",
            get(handlers::get_workload).delete(handlers::deactivate_workload),
        )
        .route("/workloads/{namespace}/{name}/status", get(handlers::get_status))
        .route("/workloads/{namespace}/{name}/events", get(handlers::list_events))
        .route("/workloads/{namespace}/{name}/samples", post(handlers::push_samples))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
