//! `tidelined run`: wires the subsystems together and serves until Ctrl-C.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use tideline_autoscale::{
    Autoscaler, CycleContext, DryRunScaleTarget, EngineSettings, HttpScaleTarget, RetryPolicy,
    ScaleExecutor, ScaleTarget, ScalingDecisionEngine, WorkloadRegistry, epoch_secs,
};
use tideline_core::{ConfigError, TidelineConfig};
use tideline_metrics::{HttpMetricsSource, MetricSampler, build_aggregator};
use tideline_state::{StateStore, WorkloadSpec};

pub fn engine_settings(config: &TidelineConfig) -> Result<EngineSettings, ConfigError> {
    config.engine.validate()?;
    Ok(EngineSettings {
        interval: config.engine.interval()?,
        cycle_deadline: config.engine.cycle_deadline()?,
        max_concurrency: config.engine.max_concurrency,
    })
}

pub fn retry_policy(config: &TidelineConfig) -> Result<RetryPolicy, ConfigError> {
    Ok(RetryPolicy {
        max_attempts: config.scale.max_attempts.max(1),
        base_delay: config.scale.base_delay()?,
        max_delay: config.scale.max_delay()?,
    })
}

fn build_context(config: &TidelineConfig, store: StateStore) -> anyhow::Result<CycleContext> {
    let retention = config.engine.retention()?;
    let sampler = match &config.metrics {
        Some(metrics) => {
            info!(endpoint = %metrics.endpoint, "pulling samples from metrics endpoint");
            let source = HttpMetricsSource::new(&metrics.endpoint, metrics.timeout()?);
            MetricSampler::with_source(Arc::new(source), retention)
        }
        None => {
            info!("no metrics endpoint configured, accepting pushed samples only");
            MetricSampler::new(retention)
        }
    };

    let target: Arc<dyn ScaleTarget> = match &config.scale.endpoint {
        Some(endpoint) => {
            info!(%endpoint, "scaling through HTTP scale endpoint");
            Arc::new(HttpScaleTarget::new(endpoint, config.scale.timeout()?))
        }
        None => {
            warn!("no scale endpoint configured, decisions are recorded but not applied");
            Arc::new(DryRunScaleTarget::new())
        }
    };

    Ok(CycleContext {
        store,
        sampler,
        aggregator: build_aggregator(&config.engine.aggregation),
        engine: ScalingDecisionEngine::new(),
        executor: ScaleExecutor::new(target, retry_policy(config)?),
    })
}

/// Run the daemon.
pub async fn run_daemon(config_path: &Path, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!(config = ?config_path, "Tideline daemon starting");
    let config = TidelineConfig::from_file(config_path)?;
    let settings = engine_settings(&config)?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("tideline.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = Arc::new(WorkloadRegistry::new(store.clone()));
    let restored = registry.load().await?;
    info!(restored, "workload registry loaded");

    // Config workloads override whatever was persisted under the same id.
    let now = epoch_secs();
    for workload in &config.workloads {
        let spec = WorkloadSpec::from_config(workload, now)?;
        registry.register(spec, now).await?;
    }
    info!(
        configured = config.workloads.len(),
        total = registry.len().await,
        "workloads registered"
    );

    let ctx = Arc::new(build_context(&config, store)?);
    let autoscaler = Autoscaler::new(Arc::clone(&registry), ctx, settings);
    info!(
        interval = ?settings.interval,
        deadline = ?settings.cycle_deadline,
        max_concurrency = settings.max_concurrency,
        "autoscaler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = tideline_api::build_router(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Let in-flight cycles finish.
    let _ = autoscale_handle.await;

    info!("Tideline daemon stopped");
    Ok(())
}
