//! Replica-count decisions.
//!
//! ```text
//! ratio   = utilization / target
//! |ratio - 1| <= tolerance     → desired = current
//! utilization == 0             → desired = min_replicas
//! otherwise                    → desired = ceil(current * ratio)
//! desired = rate_limit(current, desired)   // up / down max_change_percent
//! desired = clamp(desired, min, max)       // always last
//! ```
//!
//! Decisions are advisory; the stabilization window decides whether they
//! are applied.

use tracing::debug;

use tideline_state::{ScaleDirection, ScalingDecision, UtilizationSnapshot, WorkloadSpec};

/// Stateless, pure decision function.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalingDecisionEngine;

impl ScalingDecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute the desired replica count for one cycle.
    pub fn decide(
        &self,
        snapshot: &UtilizationSnapshot,
        spec: &WorkloadSpec,
        current_replicas: u32,
        now: u64,
    ) -> ScalingDecision {
        let utilization = snapshot.aggregated_value;
        let target = spec.target_utilization_percent;

        let (proposed, reason) = if !target.is_finite() || target <= 0.0 {
            (current_replicas, format!("target {target} is not positive"))
        } else if !utilization.is_finite() || utilization < 0.0 {
            (current_replicas, format!("utilization {utilization} is not usable"))
        } else if utilization == 0.0 {
            (
                rate_limit(spec, current_replicas, spec.min_replicas),
                "zero utilization".to_string(),
            )
        } else {
            let ratio = utilization / target;
            if (ratio - 1.0).abs() <= spec.behavior.tolerance {
                (
                    current_replicas,
                    format!("utilization {utilization:.1} within tolerance of target {target:.1}"),
                )
            } else {
                // A workload at zero replicas scales from one.
                let base = current_replicas.max(1) as f64;
                let raw = (base * utilization / target).ceil().min(u32::MAX as f64) as u32;
                (
                    rate_limit(spec, current_replicas, raw),
                    format!("utilization {utilization:.1} vs target {target:.1}"),
                )
            }
        };

        let decision = self.finish(spec, current_replicas, proposed, reason, utilization, now);
        debug!(
            workload = %spec.id,
            from = current_replicas,
            to = decision.desired_replicas,
            utilization,
            target,
            direction = %decision.direction,
            "decision computed"
        );
        decision
    }

    /// Decision used when no utilization signal exists: only pulls the
    /// current count back into `[min, max]`.
    pub fn enforce_bounds(
        &self,
        spec: &WorkloadSpec,
        current_replicas: u32,
        now: u64,
    ) -> ScalingDecision {
        self.finish(
            spec,
            current_replicas,
            current_replicas,
            "replica count outside bounds".to_string(),
            0.0,
            now,
        )
    }

    fn finish(
        &self,
        spec: &WorkloadSpec,
        current_replicas: u32,
        proposed: u32,
        mut reason: String,
        utilization: f64,
        now: u64,
    ) -> ScalingDecision {
        let desired = spec.clamp_replicas(proposed);
        if desired != proposed {
            reason.push_str(&format!(
                "; clamped {proposed} into [{}, {}]",
                spec.min_replicas, spec.max_replicas
            ));
        }
        ScalingDecision {
            workload_id: spec.id.clone(),
            current_replicas,
            desired_replicas: desired,
            direction: ScaleDirection::between(current_replicas, desired),
            reason,
            utilization_percent: utilization,
            decided_at: now,
        }
    }
}

/// Apply per-direction rate limits. Each direction may always move by at
/// least one replica.
fn rate_limit(spec: &WorkloadSpec, current: u32, proposed: u32) -> u32 {
    let behavior = &spec.behavior;
    if proposed > current {
        let pct = behavior.scale_up.max_change_percent as u64;
        let step = (current as u64 * pct).div_ceil(100).max(1);
        proposed.min(current.saturating_add(step.min(u32::MAX as u64) as u32))
    } else if proposed < current {
        let pct = behavior.scale_down.max_change_percent.min(100) as u64;
        let step = (current as u64 * pct / 100).max(1);
        proposed.max(current.saturating_sub(step as u32))
    } else {
        proposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideline_state::{MetricKind, ScalingBehavior};

    fn spec(min: u32, max: u32, target: f64) -> WorkloadSpec {
        WorkloadSpec {
            id: "default/api".to_string(),
            namespace: "default".to_string(),
            name: "api".to_string(),
            min_replicas: min,
            max_replicas: max,
            target_utilization_percent: target,
            metric: MetricKind::Cpu,
            behavior: ScalingBehavior::default(),
            active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn snapshot(utilization: f64) -> UtilizationSnapshot {
        UtilizationSnapshot {
            workload_id: "default/api".to_string(),
            kind: MetricKind::Cpu,
            aggregated_value: utilization,
            sample_count: 4,
            replica_count: 2,
            window_start: 0,
            window_end: 100,
        }
    }

    fn decide(spec: &WorkloadSpec, utilization: f64, current: u32) -> ScalingDecision {
        ScalingDecisionEngine::new().decide(&snapshot(utilization), spec, current, 100)
    }

    #[test]
    fn scales_up_proportionally() {
        let d = decide(&spec(1, 10, 70.0), 80.0, 2);
        assert_eq!(d.desired_replicas, 3);
        assert_eq!(d.direction, ScaleDirection::Up);
        assert!(d.is_change());
    }

    #[test]
    fn multiplies_before_dividing() {
        // 21 × 90 / 70 is exactly 27; dividing first rounds up to 28.
        let d = decide(&spec(1, 100, 70.0), 90.0, 21);
        assert_eq!(d.desired_replicas, 27);
    }

    #[test]
    fn matches_integer_ceiling_formula() {
        let mut s = spec(1, 100_000, 1.0);
        s.behavior.scale_up.max_change_percent = 100_000;
        s.behavior.scale_down.max_change_percent = 100;
        for target in 1..=100u64 {
            s.target_utilization_percent = target as f64;
            for utilization in 1..=200u64 {
                // Skip the tolerance band and its exact edge.
                if utilization.abs_diff(target) * 10 <= target {
                    continue;
                }
                for current in 1..=30u64 {
                    let expected = (current * utilization).div_ceil(target).max(1) as u32;
                    let d = decide(&s, utilization as f64, current as u32);
                    assert_eq!(
                        d.desired_replicas, expected,
                        "current={current} U={utilization} T={target}"
                    );
                }
            }
        }
    }

    #[test]
    fn on_target_keeps_current() {
        let d = decide(&spec(1, 10, 70.0), 70.0, 4);
        assert_eq!(d.desired_replicas, 4);
        assert_eq!(d.direction, ScaleDirection::None);
        assert!(!d.is_change());
    }

    #[test]
    fn within_tolerance_keeps_current() {
        // ratio 1.07 is inside the default 0.1 band.
        let d = decide(&spec(1, 10, 70.0), 75.0, 4);
        assert_eq!(d.desired_replicas, 4);
    }

    #[test]
    fn clamps_to_max_last() {
        let mut s = spec(2, 10, 70.0);
        s.behavior.scale_up.max_change_percent = 200;
        // ceil(5 * 210 / 70) = 15
        let d = decide(&s, 210.0, 5);
        assert_eq!(d.desired_replicas, 10);
        assert!(d.reason.contains("clamped 15"));
    }

    #[test]
    fn scale_up_rate_limited() {
        // ceil(2 * 4.0) = 8, limited to +100% of 2.
        let d = decide(&spec(1, 20, 50.0), 200.0, 2);
        assert_eq!(d.desired_replicas, 4);
    }

    #[test]
    fn scale_down_rate_limited() {
        // ceil(10 * 20 / 70) = 3, limited to -50% of 10.
        let d = decide(&spec(1, 10, 70.0), 20.0, 10);
        assert_eq!(d.desired_replicas, 5);
        assert_eq!(d.direction, ScaleDirection::Down);
    }

    #[test]
    fn small_workloads_always_move_one_replica() {
        let mut s = spec(0, 10, 70.0);
        s.behavior.scale_down.max_change_percent = 10;
        // 10% of 3 rounds to nothing; one replica still goes.
        let d = decide(&s, 10.0, 3);
        assert_eq!(d.desired_replicas, 2);
    }

    #[test]
    fn zero_utilization_goes_to_min() {
        let d = decide(&spec(0, 10, 70.0), 0.0, 1);
        assert_eq!(d.desired_replicas, 0);

        let d = decide(&spec(2, 10, 70.0), 0.0, 3);
        assert_eq!(d.desired_replicas, 2);
    }

    #[test]
    fn scales_from_zero_replicas() {
        let d = decide(&spec(0, 10, 10.0), 30.0, 0);
        assert_eq!(d.desired_replicas, 1);
        assert_eq!(d.direction, ScaleDirection::Up);
    }

    #[test]
    fn zero_target_never_divides() {
        let d = decide(&spec(1, 10, 0.0), 80.0, 4);
        assert_eq!(d.desired_replicas, 4);
        assert!(d.reason.contains("not positive"));
    }

    #[test]
    fn out_of_bounds_current_is_pulled_into_range() {
        let d = decide(&spec(3, 10, 70.0), 70.0, 1);
        assert_eq!(d.desired_replicas, 3);
        let d = decide(&spec(1, 5, 70.0), 70.0, 8);
        assert_eq!(d.desired_replicas, 5);

        let d = ScalingDecisionEngine::new().enforce_bounds(&spec(2, 4, 70.0), 0, 5);
        assert_eq!(d.desired_replicas, 2);
        assert_eq!(d.direction, ScaleDirection::Up);
    }

    #[test]
    fn desired_always_within_bounds() {
        let engine = ScalingDecisionEngine::new();
        let s = spec(2, 10, 70.0);
        for current in 0..=15 {
            for step in 0..=60 {
                let utilization = step as f64 * 7.5;
                let d = engine.decide(&snapshot(utilization), &s, current, 1);
                assert!(
                    (2..=10).contains(&d.desired_replicas),
                    "current={current} utilization={utilization} desired={}",
                    d.desired_replicas
                );
            }
        }
    }

    #[test]
    fn decide_is_idempotent() {
        let s = spec(1, 10, 70.0);
        assert_eq!(decide(&s, 123.0, 3), decide(&s, 123.0, 3));
    }
}
