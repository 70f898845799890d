//! Two-channel cooldown gate between decisions and execution.
//!
//! Each direction has its own channel. A committed scale-up only cools the
//! scale-up channel, so an immediate scale-down is still evaluated (and the
//! other way round).

use tracing::debug;

use tideline_state::{ScaleDirection, ScalingBehavior, ScalingDecision, StabilizationState};

/// State of one direction's channel at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    CoolingDown { until: u64 },
}

/// Outcome of gating a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Suppressed { direction: ScaleDirection, until: u64 },
}

/// Per-workload stabilization gate.
#[derive(Debug, Clone)]
pub struct StabilizationWindow {
    state: StabilizationState,
    behavior: ScalingBehavior,
}

impl StabilizationWindow {
    pub fn new(state: StabilizationState, behavior: ScalingBehavior) -> Self {
        Self { state, behavior }
    }

    pub fn state(&self) -> &StabilizationState {
        &self.state
    }

    /// Swap in new windows after re-registration; cooldowns in progress stay.
    pub fn set_behavior(&mut self, behavior: ScalingBehavior) {
        self.behavior = behavior;
    }

    pub fn channel(&self, direction: ScaleDirection, now: u64) -> ChannelState {
        let (last, window) = match direction {
            ScaleDirection::Up => (
                self.state.last_scale_up_at,
                self.behavior.scale_up.stabilization_window_secs,
            ),
            ScaleDirection::Down => (
                self.state.last_scale_down_at,
                self.behavior.scale_down.stabilization_window_secs,
            ),
            ScaleDirection::None => return ChannelState::Idle,
        };
        match last {
            Some(at) if now < at.saturating_add(window) => ChannelState::CoolingDown {
                until: at.saturating_add(window),
            },
            _ => ChannelState::Idle,
        }
    }

    /// Gate a decision. No-change decisions are always approved.
    pub fn evaluate(&self, decision: &ScalingDecision, now: u64) -> Verdict {
        match self.channel(decision.direction, now) {
            ChannelState::Idle => Verdict::Approved,
            ChannelState::CoolingDown { until } => {
                debug!(
                    workload = %decision.workload_id,
                    direction = %decision.direction,
                    until,
                    "decision suppressed by stabilization window"
                );
                Verdict::Suppressed {
                    direction: decision.direction,
                    until,
                }
            }
        }
    }

    /// Start the cooldown for the decision's direction. Only call once the
    /// scale target acknowledged the change.
    pub fn record_commit(&mut self, decision: &ScalingDecision, now: u64) {
        match decision.direction {
            ScaleDirection::Up => self.state.last_scale_up_at = Some(now),
            ScaleDirection::Down => self.state.last_scale_down_at = Some(now),
            ScaleDirection::None => {}
        }
    }
}
