//! End-to-end runs of the autoscaler over several ticks: pull source,
//! aggregation policy, cooldowns, and restart from an on-disk store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tideline_autoscale::{
    Autoscaler, CycleContext, CycleOutcome, DryRunScaleTarget, EngineSettings, RetryPolicy,
    ScaleExecutor, ScalingDecisionEngine, WorkloadRegistry,
};
use tideline_core::AggregationPolicy;
use tideline_metrics::{
    BoxFuture, MetricSampler, MetricsError, MetricsSource, build_aggregator,
};
use tideline_state::{
    EventKind, MetricKind, MetricSample, ScalingBehavior, StateStore, WorkloadSpec,
};

/// Reports every replica of the workload at a configurable utilization.
struct FakeCluster {
    target: Arc<DryRunScaleTarget>,
    percent: Mutex<f64>,
}

impl FakeCluster {
    fn set_percent(&self, percent: f64) {
        *self.percent.lock().unwrap() = percent;
    }
}

impl MetricsSource for FakeCluster {
    fn fetch<'a>(
        &'a self,
        workload: &'a WorkloadSpec,
        now: u64,
    ) -> BoxFuture<'a, Result<Vec<MetricSample>, MetricsError>> {
        Box::pin(async move {
            let percent = *self.percent.lock().unwrap();
            let replicas = self.target.replicas(&workload.id).await.unwrap_or(0);
            Ok((0..replicas)
                .map(|r| MetricSample {
                    workload_id: workload.id.clone(),
                    replica_id: format!("{}-{r}", workload.name),
                    kind: MetricKind::Cpu,
                    raw_value: percent * 5.0,
                    requested_value: Some(500.0),
                    ready: true,
                    timestamp: now,
                })
                .collect())
        })
    }
}

fn spec() -> WorkloadSpec {
    WorkloadSpec {
        id: "default/api".to_string(),
        namespace: "default".to_string(),
        name: "api".to_string(),
        min_replicas: 2,
        max_replicas: 10,
        target_utilization_percent: 70.0,
        metric: MetricKind::Cpu,
        behavior: ScalingBehavior::default(),
        active: true,
        created_at: 0,
        updated_at: 0,
    }
}

fn build(store: StateStore, cluster: Arc<FakeCluster>) -> Autoscaler {
    let ctx = CycleContext {
        store: store.clone(),
        // Retention of one tick keeps only the latest poll.
        sampler: MetricSampler::with_source(cluster.clone(), Duration::from_secs(10)),
        aggregator: build_aggregator(&AggregationPolicy::Mean),
        engine: ScalingDecisionEngine::new(),
        executor: ScaleExecutor::new(cluster.target.clone(), RetryPolicy::default()),
    };
    Autoscaler::new(
        Arc::new(WorkloadRegistry::new(store)),
        Arc::new(ctx),
        EngineSettings::default(),
    )
}

fn outcome(results: &[(String, CycleOutcome)]) -> CycleOutcome {
    results[0].1.clone()
}

#[tokio::test]
async fn scales_up_then_waits_out_scale_down_window() {
    let target = Arc::new(DryRunScaleTarget::new());
    target.set("default/api", 2).await;
    let cluster = Arc::new(FakeCluster {
        target: target.clone(),
        percent: Mutex::new(140.0),
    });
    let scaler = build(StateStore::open_in_memory().unwrap(), cluster.clone());
    scaler.registry().register(spec(), 0).await.unwrap();

    // 2 replicas at 140% of a 70% target: doubled.
    assert_eq!(
        outcome(&scaler.evaluate_all_at(1000).await),
        CycleOutcome::Scaled { from: 2, to: 4 }
    );

    // Load drops; scale-down is allowed right after a scale-up.
    cluster.set_percent(20.0);
    assert_eq!(
        outcome(&scaler.evaluate_all_at(1015).await),
        CycleOutcome::Scaled { from: 4, to: 2 }
    );

    // The 30s scale-up window started at 1000 has just expired.
    cluster.set_percent(140.0);
    assert_eq!(
        outcome(&scaler.evaluate_all_at(1030).await),
        CycleOutcome::Scaled { from: 2, to: 4 }
    );

    // Drop again: now inside the 300s scale-down window started at 1015.
    cluster.set_percent(20.0);
    assert!(matches!(
        outcome(&scaler.evaluate_all_at(1045).await),
        CycleOutcome::Suppressed { until: 1315, .. }
    ));
    assert_eq!(target.replicas("default/api").await, Some(4));

    // After the window the suppressed scale-down goes through.
    assert_eq!(
        outcome(&scaler.evaluate_all_at(1315).await),
        CycleOutcome::Scaled { from: 4, to: 2 }
    );

    let kinds: Vec<EventKind> = scaler
        .registry()
        .store()
        .list_events("default/api", 100)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Registered,
            EventKind::Scaled,
            EventKind::Scaled,
            EventKind::Scaled,
            EventKind::Suppressed,
            EventKind::Scaled,
        ]
    );
}

#[tokio::test]
async fn cooldowns_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tideline.redb");
    let target = Arc::new(DryRunScaleTarget::new());
    target.set("default/api", 4).await;
    let cluster = Arc::new(FakeCluster {
        target: target.clone(),
        percent: Mutex::new(20.0),
    });

    {
        let scaler = build(StateStore::open(&path).unwrap(), cluster.clone());
        scaler.registry().register(spec(), 0).await.unwrap();
        assert_eq!(
            outcome(&scaler.evaluate_all_at(1000).await),
            CycleOutcome::Scaled { from: 4, to: 2 }
        );
    }

    // Push replicas back up behind the autoscaler's back and restart.
    target.set("default/api", 6).await;
    let scaler = build(StateStore::open(&path).unwrap(), cluster.clone());
    assert_eq!(scaler.registry().load().await.unwrap(), 1);

    assert!(matches!(
        outcome(&scaler.evaluate_all_at(1100).await),
        CycleOutcome::Suppressed { until: 1300, .. }
    ));
    let status = scaler
        .registry()
        .store()
        .get_status("default/api")
        .unwrap()
        .unwrap();
    assert_eq!(status.current_replicas, 6);
    assert_eq!(status.last_scale_at, Some(1000));
}

#[tokio::test]
async fn deactivated_workload_is_left_alone() {
    let target = Arc::new(DryRunScaleTarget::new());
    target.set("default/api", 2).await;
    let cluster = Arc::new(FakeCluster {
        target: target.clone(),
        percent: Mutex::new(140.0),
    });
    let scaler = build(StateStore::open_in_memory().unwrap(), cluster);
    scaler.registry().register(spec(), 0).await.unwrap();
    scaler.registry().deactivate("default/api", 10).await.unwrap();

    assert!(scaler.evaluate_all_at(1000).await.is_empty());
    assert_eq!(target.replicas("default/api").await, Some(2));
}
