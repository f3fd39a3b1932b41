use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::reconciliation::Reconciler;
use crate::settings::LoopTiming;
use crate::summary::{self, CycleReport};

/// Loop state exposed to the admin endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStatus {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

pub type SharedStatus = Arc<RwLock<LoopStatus>>;

pub fn new_status() -> SharedStatus {
    Arc::new(RwLock::new(LoopStatus::default()))
}

/// Error backoff plus a random delay in `[0, error_backoff_jitter]`.
pub fn backoff_with_jitter(timing: &LoopTiming) -> Duration {
    let jitter_ms = timing.error_backoff_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return timing.error_backoff;
    }
    let extra = rand::thread_rng().gen_range(0..=jitter_ms);
    timing.error_backoff + Duration::from_millis(extra)
}

/// job-reconcile: poll, diff and remediate forever, until `shutdown` flips.
/// Shutdown is honoured between cycles; a running cycle finishes its tasks first.
pub async fn run(
    reconciler: Arc<Reconciler>,
    timing: LoopTiming,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) {
    println!(
        "🛰️  job-reconcile started (polling {} zone(s) every {}s)",
        reconciler.config().zones.len(),
        timing.poll_interval.as_secs()
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match reconciler.run_cycle().await {
            Ok(report) => {
                summary::print_summary(&report);
                let mut st = status.write().await;
                st.cycles_completed += 1;
                st.last_report = Some(report);
                timing.poll_interval
            }
            Err(e) => {
                eprintln!("❌ job-reconcile error occurred: {:#}", e);
                let mut st = status.write().await;
                st.cycles_failed += 1;
                st.last_error = Some(format!("{:#}", e));
                st.last_error_at = Some(Utc::now());
                backoff_with_jitter(&timing)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                // Err means the sender is gone, which is a shutdown too.
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    println!("🛑 job-reconcile stopped");
}
