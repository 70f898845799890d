//! Prometheus text exposition of autoscaler state.
//!
//! One gauge or counter family per field, labelled by `workload`. Status
//! families only cover workloads that have completed at least one cycle.

use std::collections::HashMap;
use std::fmt::Write as _;

use tideline_state::{WorkloadSpec, WorkloadStatus};

/// Writes the `# HELP` / `# TYPE` header and one line per labelled value.
fn family<'a>(
    out: &mut String,
    name: &str,
    kind: &str,
    help: &str,
    rows: impl Iterator<Item = (&'a str, String)>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    for (workload, value) in rows {
        let _ = writeln!(out, "{name}{{workload=\"{}\"}} {value}", escape_label(workload));
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render workload policies and their observed status.
pub fn render_prometheus(workloads: &[WorkloadSpec], statuses: &[WorkloadStatus]) -> String {
    let mut out = String::new();
    let by_id: HashMap<&str, &WorkloadStatus> = statuses
        .iter()
        .map(|s| (s.workload_id.as_str(), s))
        .collect();
    let tracked: Vec<(&WorkloadSpec, &WorkloadStatus)> = workloads
        .iter()
        .filter_map(|w| by_id.get(w.id.as_str()).map(|s| (w, *s)))
        .collect();

    family(
        &mut out,
        "tideline_current_replicas",
        "gauge",
        "Replica count last observed on the scale target.",
        tracked
            .iter()
            .map(|(w, s)| (w.id.as_str(), s.current_replicas.to_string())),
    );
    family(
        &mut out,
        "tideline_desired_replicas",
        "gauge",
        "Replica count of the last approved decision.",
        tracked
            .iter()
            .map(|(w, s)| (w.id.as_str(), s.desired_replicas.to_string())),
    );
    family(
        &mut out,
        "tideline_utilization_percent",
        "gauge",
        "Last aggregated utilization (raw average for custom metrics).",
        tracked.iter().filter_map(|(w, s)| {
            s.last_utilization_percent
                .map(|u| (w.id.as_str(), format!("{u:.2}")))
        }),
    );
    family(
        &mut out,
        "tideline_missed_cycles_total",
        "counter",
        "Evaluation cycles skipped for deadline or overlap.",
        tracked
            .iter()
            .map(|(w, s)| (w.id.as_str(), s.missed_cycles.to_string())),
    );
    family(
        &mut out,
        "tideline_disabled",
        "gauge",
        "1 when a fatal error disabled autoscaling.",
        tracked
            .iter()
            .map(|(w, s)| (w.id.as_str(), u8::from(s.is_disabled()).to_string())),
    );

    family(
        &mut out,
        "tideline_min_replicas",
        "gauge",
        "Configured lower replica bound.",
        workloads
            .iter()
            .map(|w| (w.id.as_str(), w.min_replicas.to_string())),
    );
    family(
        &mut out,
        "tideline_max_replicas",
        "gauge",
        "Configured upper replica bound.",
        workloads
            .iter()
            .map(|w| (w.id.as_str(), w.max_replicas.to_string())),
    );
    family(
        &mut out,
        "tideline_target_utilization_percent",
        "gauge",
        "Configured utilization target.",
        workloads
            .iter()
            .map(|w| (w.id.as_str(), format!("{:.2}", w.target_utilization_percent))),
    );
    family(
        &mut out,
        "tideline_workload_active",
        "gauge",
        "1 when the workload is evaluated each tick.",
        workloads
            .iter()
            .map(|w| (w.id.as_str(), u8::from(w.active).to_string())),
    );

    out
}
