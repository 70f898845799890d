//! One evaluation cycle of one workload.
//!
//! ```text
//! observe replicas → sample → aggregate → decide → stabilize → apply
//!                  → commit stabilization → persist status + events
//! ```
//!
//! Stages run sequentially inside the workload's slot. Any error ends the
//! cycle without touching stabilization state; the last approved decision
//! stays in effect.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use tideline_metrics::{MetricSampler, SampleWindow, UtilizationAggregator};
use tideline_state::{
    EventKind, ScaleDirection, ScaleEvent, StabilizationState, StateStore, WorkloadSpec,
    WorkloadStatus,
};

use crate::decision::ScalingDecisionEngine;
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::executor::ScaleExecutor;
use crate::stabilization::{StabilizationWindow, Verdict};

/// Events kept per workload.
pub const EVENT_HISTORY_LIMIT: usize = 100;

/// Components shared by every cycle.
pub struct CycleContext {
    pub store: StateStore,
    pub sampler: MetricSampler,
    pub aggregator: Arc<dyn UtilizationAggregator>,
    pub engine: ScalingDecisionEngine,
    pub executor: ScaleExecutor,
}

/// Everything one workload owns between cycles.
pub struct WorkloadSlot {
    pub spec: WorkloadSpec,
    pub window: SampleWindow,
    pub stabilization: StabilizationWindow,
    pub status: WorkloadStatus,
}

impl WorkloadSlot {
    pub fn new(spec: WorkloadSpec, status: WorkloadStatus, stabilization: StabilizationState) -> Self {
        Self {
            window: SampleWindow::new(&spec.id),
            stabilization: StabilizationWindow::new(stabilization, spec.behavior.clone()),
            status,
            spec,
        }
    }
}

/// What a cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Scaled { from: u32, to: u32 },
    Unchanged { replicas: u32 },
    Suppressed { direction: ScaleDirection, until: u64 },
    Skipped { reason: String },
    Failed { error: String },
    Disabled { reason: String },
    /// Aborted by the deadline or not started because the slot was busy.
    Missed,
    Inactive,
}

/// Run one cycle and persist its results. Never fails: errors become the
/// outcome and an event.
pub async fn run_cycle(ctx: &CycleContext, slot: &mut WorkloadSlot, now: u64) -> CycleOutcome {
    if !slot.spec.active {
        return CycleOutcome::Inactive;
    }
    if let Some(reason) = &slot.status.disabled_reason {
        return CycleOutcome::Disabled {
            reason: reason.clone(),
        };
    }

    let outcome = match evaluate(ctx, slot, now).await {
        Ok(outcome) => outcome,
        Err(e) => on_error(ctx, slot, e, now),
    };

    slot.status.updated_at = now;
    if let Err(e) = ctx.store.put_status(&slot.status) {
        error!(workload = %slot.spec.id, error = %e, "failed to persist status");
    }
    outcome
}

async fn evaluate(
    ctx: &CycleContext,
    slot: &mut WorkloadSlot,
    now: u64,
) -> AutoscaleResult<CycleOutcome> {
    let spec = &slot.spec;

    let current = ctx.executor.observe(&spec.id).await?;
    slot.status.current_replicas = current;

    let samples = ctx
        .sampler
        .sample(spec, &mut slot.window, now)
        .await
        .map_err(|source| AutoscaleError::MetricsUnavailable {
            workload_id: spec.id.clone(),
            source,
        })?;

    let decision = match ctx.aggregator.aggregate(&spec.id, &samples, &spec.metric) {
        Ok(snapshot) => {
            slot.status.last_utilization_percent = Some(snapshot.aggregated_value);
            ctx.engine.decide(&snapshot, spec, current, now)
        }
        // Without data only an out-of-bounds count is acted on.
        Err(_) if spec.clamp_replicas(current) != current => {
            ctx.engine.enforce_bounds(spec, current, now)
        }
        Err(e) => return Err(e.into()),
    };

    if !decision.is_change() {
        slot.status.desired_replicas = decision.desired_replicas;
        return Ok(CycleOutcome::Unchanged { replicas: current });
    }

    if let Verdict::Suppressed { direction, until } = slot.stabilization.evaluate(&decision, now) {
        append_event(
            &ctx.store,
            ScaleEvent::new(
                &spec.id,
                now,
                EventKind::Suppressed,
                format!(
                    "{direction} to {} suppressed until {until}: {}",
                    decision.desired_replicas, decision.reason
                ),
            ),
        );
        return Ok(CycleOutcome::Suppressed { direction, until });
    }

    let ack = ctx.executor.apply(&decision).await?;

    slot.stabilization.record_commit(&decision, now);
    ctx.store.put_stabilization(slot.stabilization.state())?;

    slot.status.current_replicas = ack.replicas;
    slot.status.desired_replicas = decision.desired_replicas;
    slot.status.last_scale_at = Some(now);
    append_event(
        &ctx.store,
        ScaleEvent::new(
            &spec.id,
            now,
            EventKind::Scaled,
            format!("{} → {}: {}", current, ack.replicas, decision.reason),
        ),
    );
    info!(
        workload = %spec.id,
        from = current,
        to = ack.replicas,
        utilization = decision.utilization_percent,
        target = spec.target_utilization_percent,
        "workload scaled"
    );
    slot.status.last_decision = Some(decision);

    Ok(CycleOutcome::Scaled {
        from: current,
        to: ack.replicas,
    })
}

fn on_error(
    ctx: &CycleContext,
    slot: &mut WorkloadSlot,
    err: AutoscaleError,
    now: u64,
) -> CycleOutcome {
    let id = slot.spec.id.clone();
    let message = err.to_string();

    match err {
        AutoscaleError::WorkloadNotFound(_) => {
            warn!(workload = %id, error = %message, "workload disabled");
            slot.status.disabled_reason = Some(message.clone());
            append_event(&ctx.store, ScaleEvent::new(&id, now, EventKind::Disabled, &message));
            CycleOutcome::Disabled { reason: message }
        }
        e if e.is_skip() => {
            debug!(workload = %id, reason = %message, "cycle skipped");
            append_event(&ctx.store, ScaleEvent::new(&id, now, EventKind::Skipped, &message));
            CycleOutcome::Skipped { reason: message }
        }
        _ => {
            warn!(workload = %id, error = %message, "cycle failed");
            append_event(&ctx.store, ScaleEvent::new(&id, now, EventKind::Failed, &message));
            CycleOutcome::Failed { error: message }
        }
    }
}

/// Append an event and trim the workload's history. Store errors are logged.
pub(crate) fn append_event(store: &StateStore, event: ScaleEvent) {
    if let Err(e) = store.append_event(&event) {
        warn!(workload = %event.workload_id, error = %e, "failed to record event");
        return;
    }
    if let Err(e) = store.prune_events(&event.workload_id, EVENT_HISTORY_LIMIT) {
        warn!(workload = %event.workload_id, error = %e, "failed to prune events");
    }
}
