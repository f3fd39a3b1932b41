pub mod admin;
pub mod logger;
pub mod provider_manager;
pub mod reconcile_job;
pub mod reconciliation;
pub mod remediation;
pub mod settings;
pub mod summary;

pub use reconciliation::{plan_cycle, CyclePlan, Reconciler};
pub use remediation::{RemediationAction, RemediationTask};
pub use summary::CycleReport;
