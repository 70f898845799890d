//! The autoscaler loop: one tick, one cycle per active workload.
//!
//! Cycles run as tasks bounded by a semaphore, each under a deadline. A
//! workload whose previous cycle still holds its slot is counted as missed
//! instead of queued.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use tideline_state::{EventKind, ScaleEvent, WorkloadId};

use crate::cycle::{CycleContext, CycleOutcome, WorkloadSlot, append_event, run_cycle};
use crate::registry::{WorkloadHandle, WorkloadRegistry};

/// Scheduling knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub interval: Duration,
    pub cycle_deadline: Duration,
    pub max_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            cycle_deadline: Duration::from_secs(10),
            max_concurrency: 16,
        }
    }
}

type CycleTasks = JoinSet<(WorkloadId, CycleOutcome)>;

/// Drives evaluation cycles for every registered workload.
pub struct Autoscaler {
    registry: Arc<WorkloadRegistry>,
    ctx: Arc<CycleContext>,
    settings: EngineSettings,
    permits: Arc<Semaphore>,
}

impl Autoscaler {
    pub fn new(
        registry: Arc<WorkloadRegistry>,
        ctx: Arc<CycleContext>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            registry,
            ctx,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.registry
    }

    /// Evaluate every workload once and wait for all cycles.
    pub async fn evaluate_all(&self) -> Vec<(WorkloadId, CycleOutcome)> {
        self.evaluate_all_at(epoch_secs()).await
    }

    /// [`evaluate_all`](Self::evaluate_all) with an explicit clock.
    pub async fn evaluate_all_at(&self, now: u64) -> Vec<(WorkloadId, CycleOutcome)> {
        let mut tasks = CycleTasks::new();
        let mut outcomes = self.dispatch(&mut tasks, now).await;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "cycle task panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    /// Spawn a cycle for every workload whose slot is free. Busy workloads
    /// are returned as missed.
    async fn dispatch(&self, tasks: &mut CycleTasks, now: u64) -> Vec<(WorkloadId, CycleOutcome)> {
        let mut missed = Vec::new();
        for handle in self.registry.handles().await {
            let Some(slot) = handle.try_acquire() else {
                let total = handle.record_missed();
                warn!(workload = %handle.id(), missed_cycles = total, "previous cycle still running");
                append_event(
                    &self.ctx.store,
                    ScaleEvent::new(
                        handle.id(),
                        now,
                        EventKind::Missed,
                        "previous cycle still running",
                    ),
                );
                missed.push((handle.id().to_string(), CycleOutcome::Missed));
                continue;
            };

            let ctx = self.ctx.clone();
            let permits = self.permits.clone();
            let deadline = self.settings.cycle_deadline;
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let outcome = run_slot(&ctx, &handle, slot, now, deadline).await;
                (handle.id().to_string(), outcome)
            });
        }
        missed
    }

    /// Tick until `shutdown` flips, then wait for in-flight cycles.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            deadline_secs = self.settings.cycle_deadline.as_secs(),
            max_concurrency = self.settings.max_concurrency,
            "autoscaler started"
        );

        // `interval` panics on a zero period.
        let period = self.settings.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks = CycleTasks::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    reap(&mut tasks);
                    let now = epoch_secs();
                    let missed = self.dispatch(&mut tasks, now).await;
                    debug!(in_flight = tasks.len(), missed = missed.len(), now, "tick dispatched");
                }
                _ = shutdown.changed() => {
                    info!(in_flight = tasks.len(), "autoscaler shutting down");
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }
    }
}

/// Log outcomes of cycles that finished since the last tick.
fn reap(tasks: &mut CycleTasks) {
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok((workload, outcome)) => debug!(%workload, ?outcome, "cycle finished"),
            Err(e) => error!(error = %e, "cycle task panicked"),
        }
    }
}

/// Run one cycle in an acquired slot under the deadline.
async fn run_slot(
    ctx: &CycleContext,
    handle: &WorkloadHandle,
    mut slot: OwnedMutexGuard<WorkloadSlot>,
    now: u64,
    deadline: Duration,
) -> CycleOutcome {
    let pushed = handle.take_pushed().await;
    if !pushed.is_empty()
        && let Err(e) = slot.window.record_all(pushed)
    {
        warn!(workload = %handle.id(), error = %e, "dropping pushed samples");
    }
    slot.status.missed_cycles = handle.missed_cycles();

    match tokio::time::timeout(deadline, run_cycle(ctx, &mut *slot, now)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let total = handle.record_missed();
            warn!(
                workload = %handle.id(),
                deadline_ms = deadline.as_millis() as u64,
                missed_cycles = total,
                "cycle exceeded deadline"
            );
            slot.status.missed_cycles = total;
            slot.status.updated_at = now;
            if let Err(e) = ctx.store.put_status(&slot.status) {
                error!(workload = %handle.id(), error = %e, "failed to persist status");
            }
            append_event(
                &ctx.store,
                ScaleEvent::new(
                    handle.id(),
                    now,
                    EventKind::Missed,
                    format!("cycle exceeded {deadline:?} deadline"),
                ),
            );
            CycleOutcome::Missed
        }
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
