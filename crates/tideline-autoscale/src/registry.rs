//! Workload registry: the only owner of per-workload autoscaling state.
//!
//! Each registered workload gets a [`WorkloadHandle`] holding its slot
//! behind an async mutex. The controller takes the slot with `try_lock` so
//! a workload never has two cycles in flight. Pushed samples go to a
//! separate inbox so the API never waits on a running cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use tideline_metrics::MAX_WINDOW_SAMPLES;
use tideline_state::{
    EventKind, MetricKind, MetricSample, ScaleEvent, StabilizationState, StateStore, WorkloadId,
    WorkloadSpec, WorkloadStatus,
};

use crate::cycle::{WorkloadSlot, append_event};
use crate::error::{AutoscaleError, AutoscaleResult};

/// Shared handle to one workload's slot.
pub struct WorkloadHandle {
    id: WorkloadId,
    slot: Arc<Mutex<WorkloadSlot>>,
    inbox: Mutex<Vec<MetricSample>>,
    missed: AtomicU64,
}

impl WorkloadHandle {
    fn new(slot: WorkloadSlot) -> Self {
        Self {
            id: slot.spec.id.clone(),
            missed: AtomicU64::new(slot.status.missed_cycles),
            slot: Arc::new(Mutex::new(slot)),
            inbox: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the slot if no cycle currently holds it.
    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<WorkloadSlot>> {
        self.slot.clone().try_lock_owned().ok()
    }

    /// Wait for the slot.
    pub async fn acquire(&self) -> OwnedMutexGuard<WorkloadSlot> {
        self.slot.clone().lock_owned().await
    }

    /// Drain samples pushed since the last cycle.
    pub async fn take_pushed(&self) -> Vec<MetricSample> {
        std::mem::take(&mut *self.inbox.lock().await)
    }

    /// Count one missed cycle; returns the new total.
    pub fn record_missed(&self) -> u64 {
        self.missed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn missed_cycles(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

/// Registered workloads, keyed by `{namespace}/{name}`.
pub struct WorkloadRegistry {
    store: StateStore,
    handles: RwLock<HashMap<WorkloadId, Arc<WorkloadHandle>>>,
}

impl WorkloadRegistry {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Reject specs the decision engine must never see.
    pub fn validate(spec: &WorkloadSpec) -> AutoscaleResult<()> {
        let id = spec.id.as_str();
        if spec.namespace.is_empty() || spec.name.is_empty() {
            return Err(AutoscaleError::invalid(id, "namespace and name are required"));
        }
        for (field, value) in [("namespace", &spec.namespace), ("name", &spec.name)] {
            if !is_dns_label(value) {
                return Err(AutoscaleError::invalid(
                    id,
                    format!(
                        "{field} {value:?} must be at most 63 lowercase alphanumerics or '-', \
                         starting and ending with an alphanumeric"
                    ),
                ));
            }
        }
        if spec.id != format!("{}/{}", spec.namespace, spec.name) {
            return Err(AutoscaleError::invalid(id, "id must be {namespace}/{name}"));
        }
        if spec.max_replicas == 0 {
            return Err(AutoscaleError::invalid(id, "max_replicas must be at least 1"));
        }
        if spec.min_replicas > spec.max_replicas {
            return Err(AutoscaleError::invalid(
                id,
                format!(
                    "min_replicas ({}) exceeds max_replicas ({})",
                    spec.min_replicas, spec.max_replicas
                ),
            ));
        }
        let target = spec.target_utilization_percent;
        if !target.is_finite() || target <= 0.0 {
            return Err(AutoscaleError::invalid(
                id,
                format!("target_utilization_percent must be positive, got {target}"),
            ));
        }
        if let MetricKind::Custom(name) = &spec.metric
            && name.trim().is_empty()
        {
            return Err(AutoscaleError::invalid(id, "custom metric name is empty"));
        }
        let tolerance = spec.behavior.tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(AutoscaleError::invalid(
                id,
                format!("tolerance must be non-negative, got {tolerance}"),
            ));
        }
        if spec.behavior.scale_up.max_change_percent == 0
            || spec.behavior.scale_down.max_change_percent == 0
        {
            return Err(AutoscaleError::invalid(id, "max_change_percent must be at least 1"));
        }
        Ok(())
    }

    /// Register or update a workload. Re-registration keeps `created_at`,
    /// status and cooldowns, and clears a disabled slot.
    pub async fn register(&self, mut spec: WorkloadSpec, now: u64) -> AutoscaleResult<WorkloadSpec> {
        Self::validate(&spec)?;

        let existing = self.store.get_workload(&spec.id)?;
        if let Some(prev) = &existing {
            spec.created_at = prev.created_at;
        }
        spec.active = true;
        spec.updated_at = now;
        self.store.put_workload(&spec)?;

        // A running cycle may hold the slot; never wait on it under the map lock.
        let current = self.get(&spec.id).await;
        if let Some(handle) = current {
            let mut slot = handle.acquire().await;
            slot.spec = spec.clone();
            slot.stabilization.set_behavior(spec.behavior.clone());
            slot.status.disabled_reason = None;
            slot.status.updated_at = now;
            self.store.put_status(&slot.status)?;
        } else {
            let mut status = self
                .store
                .get_status(&spec.id)?
                .unwrap_or_else(|| WorkloadStatus::new(&spec.id, now));
            status.disabled_reason = None;
            status.updated_at = now;
            self.store.put_status(&status)?;
            let stabilization = self
                .store
                .get_stabilization(&spec.id)?
                .unwrap_or_else(|| StabilizationState::new(&spec.id));
            let slot = WorkloadSlot::new(spec.clone(), status, stabilization);
            self.handles
                .write()
                .await
                .insert(spec.id.clone(), Arc::new(WorkloadHandle::new(slot)));
        }

        let verb = if existing.is_some() { "updated" } else { "registered" };
        append_event(
            &self.store,
            ScaleEvent::new(
                &spec.id,
                now,
                EventKind::Registered,
                format!(
                    "{verb}: {} in [{}, {}] at {:.1}",
                    spec.metric, spec.min_replicas, spec.max_replicas, spec.target_utilization_percent
                ),
            ),
        );
        info!(
            workload = %spec.id,
            metric = %spec.metric,
            min = spec.min_replicas,
            max = spec.max_replicas,
            target = spec.target_utilization_percent,
            "workload {verb}"
        );
        Ok(spec)
    }

    /// Stop evaluating a workload. The spec and its history are kept.
    pub async fn deactivate(&self, id: &str, now: u64) -> AutoscaleResult<WorkloadSpec> {
        let mut spec = self
            .store
            .get_workload(id)?
            .ok_or_else(|| AutoscaleError::WorkloadNotFound(id.to_string()))?;
        spec.active = false;
        spec.updated_at = now;
        self.store.put_workload(&spec)?;

        self.handles.write().await.remove(id);
        append_event(
            &self.store,
            ScaleEvent::new(id, now, EventKind::Deactivated, "deactivated"),
        );
        info!(workload = %id, "workload deactivated");
        Ok(spec)
    }

    /// Rebuild slots for every active persisted workload. Returns how many
    /// were loaded.
    pub async fn load(&self) -> AutoscaleResult<usize> {
        let specs = self.store.list_workloads()?;
        let mut handles = self.handles.write().await;
        let mut loaded = 0;
        for spec in specs.into_iter().filter(|s| s.active) {
            let status = self
                .store
                .get_status(&spec.id)?
                .unwrap_or_else(|| WorkloadStatus::new(&spec.id, spec.updated_at));
            let stabilization = self
                .store
                .get_stabilization(&spec.id)?
                .unwrap_or_else(|| StabilizationState::new(&spec.id));
            debug!(workload = %spec.id, "workload restored");
            handles.insert(
                spec.id.clone(),
                Arc::new(WorkloadHandle::new(WorkloadSlot::new(spec, status, stabilization))),
            );
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Queue pushed samples for the workload's next cycle.
    pub async fn record_samples(
        &self,
        id: &str,
        samples: Vec<MetricSample>,
    ) -> AutoscaleResult<usize> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| AutoscaleError::WorkloadNotFound(id.to_string()))?;
        if let Some(foreign) = samples.iter().find(|s| s.workload_id != id) {
            return Err(AutoscaleError::InvalidSample {
                workload_id: id.to_string(),
                reason: format!("sample belongs to {}", foreign.workload_id),
            });
        }
        let count = samples.len();
        let mut inbox = handle.inbox.lock().await;
        inbox.extend(samples);
        let overflow = inbox.len().saturating_sub(MAX_WINDOW_SAMPLES);
        if overflow > 0 {
            inbox.drain(..overflow);
            warn!(workload = %id, dropped = overflow, "sample inbox full, oldest dropped");
        }
        debug!(workload = %id, count, queued = inbox.len(), "samples queued");
        Ok(count)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<WorkloadHandle>> {
        self.handles.read().await.get(id).cloned()
    }

    /// Handles of all active workloads, ordered by id.
    pub async fn handles(&self) -> Vec<Arc<WorkloadHandle>> {
        let mut handles: Vec<_> = self.handles.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}

/// RFC 1123 label: 1 to 63 lowercase alphanumerics or '-', no leading or
/// trailing '-'.
fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}
