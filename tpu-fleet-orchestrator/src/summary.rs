use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;
use tpu_fleet_common::InstanceRecord;
use uuid::Uuid;

use crate::reconciliation::ZoneFailure;
use crate::remediation::RemediationTask;

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: RemediationTask,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(task: RemediationTask, elapsed: Duration) -> Self {
        Self {
            task,
            duration_ms: elapsed.as_millis() as u64,
            error: None,
        }
    }

    pub fn failure(task: RemediationTask, elapsed: Duration, error: String) -> Self {
        Self {
            task,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What one cycle saw and did. Only the latest report is kept, in memory.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub failed_zones: Vec<ZoneFailure>,
    /// Managed records seen before remediation.
    pub total_matched: usize,
    /// Desired members as listed before remediation.
    pub instances: Vec<InstanceRecord>,
    pub outcomes: Vec<TaskOutcome>,
}

impl CycleReport {
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}

fn format_created(record: &InstanceRecord) -> String {
    record
        .create_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Human-readable status block printed at the end of every cycle.
pub fn render_status<'a>(
    instances: impl IntoIterator<Item = &'a InstanceRecord>,
    total_matched: usize,
) -> String {
    let mut out = String::from("\n=== TPU Instance Status ===\n");
    for record in instances {
        let _ = writeln!(out, "TPU {}:", record.name);
        let _ = writeln!(out, "  State: {}", record.state);
        let _ = writeln!(out, "  Created: {}", format_created(record));
        let _ = writeln!(out, "---");
    }
    let _ = writeln!(out, "\nTotal instances: {}", total_matched);
    out
}

pub fn render_summary(report: &CycleReport) -> String {
    let mut out = render_status(&report.instances, report.total_matched);
    for failure in &report.failed_zones {
        let _ = writeln!(out, "⚠️  Zone {} unavailable: {}", failure.zone, failure.error);
    }
    if !report.outcomes.is_empty() {
        let _ = writeln!(
            out,
            "Remediation: {} dispatched, {} failed",
            report.outcomes.len(),
            report.failure_count()
        );
    }
    out
}

pub fn print_summary(report: &CycleReport) {
    println!("{}", render_summary(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpu_fleet_common::{parse_create_time, InstanceState};

    fn report() -> CycleReport {
        CycleReport {
            cycle_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            failed_zones: vec![ZoneFailure {
                zone: "zone-c".into(),
                error: "timeout".into(),
            }],
            total_matched: 3,
            instances: vec![
                InstanceRecord {
                    name: "v3spot-a".into(),
                    resource_name: "projects/p/locations/zone-a/nodes/v3spot-a".into(),
                    zone: "zone-a".into(),
                    state: InstanceState::Ready,
                    create_time: parse_create_time("2024-05-02T11:00:00.861536372Z"),
                },
                InstanceRecord {
                    name: "v3spot-b".into(),
                    resource_name: "projects/p/locations/zone-a/nodes/v3spot-b".into(),
                    zone: "zone-a".into(),
                    state: InstanceState::Other("PREEMPTED".into()),
                    create_time: None,
                },
            ],
            outcomes: vec![
                TaskOutcome::success(RemediationTask::create("v4spot-a"), Duration::from_secs(3)),
                TaskOutcome::failure(
                    RemediationTask::recreate("v3spot-b", "zone-a"),
                    Duration::from_secs(1),
                    "setup failed".into(),
                ),
            ],
        }
    }

    #[test]
    fn summary_lists_records_and_totals() {
        let text = render_summary(&report());
        assert!(text.contains("=== TPU Instance Status ==="));
        assert!(text.contains("TPU v3spot-a:\n  State: READY\n  Created: 2024-05-02 11:00:00\n---"));
        assert!(text.contains("TPU v3spot-b:\n  State: PREEMPTED\n  Created: unknown"));
        assert!(text.contains("Total instances: 3"));
        assert!(text.contains("Zone zone-c unavailable: timeout"));
        assert!(text.contains("Remediation: 2 dispatched, 1 failed"));
    }

    #[test]
    fn report_serializes_for_status_endpoint() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["total_matched"], 3);
        assert_eq!(json["instances"][1]["state"], "PREEMPTED");
        assert_eq!(json["outcomes"][1]["task"]["action"]["kind"], "recreate");
        assert_eq!(json["outcomes"][1]["task"]["action"]["zone"], "zone-a");
        assert_eq!(json["outcomes"][0]["error"], serde_json::Value::Null);
    }
}
