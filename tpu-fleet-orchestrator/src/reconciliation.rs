use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tpu_fleet_common::{FleetConfig, InstanceRecord};
use tpu_fleet_providers::{CloudProvider, InstanceBootstrapper};
use uuid::Uuid;

use crate::remediation::{RemediationTask, Remediator};
use crate::summary::{CycleReport, TaskOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneFailure {
    pub zone: String,
    pub error: String,
}

/// Fresh view of the cloud for one cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Vec<InstanceRecord>,
    pub failed_zones: Vec<ZoneFailure>,
}

/// Desired-vs-actual diff for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CyclePlan {
    /// Managed records, in listing order.
    pub matched: Vec<InstanceRecord>,
    pub existing: BTreeSet<String>,
    /// Desired names listed in a non-READY state -> zone they were listed in.
    pub recreate: BTreeMap<String, String>,
    pub create: BTreeSet<String>,
}

impl CyclePlan {
    pub fn is_empty(&self) -> bool {
        self.recreate.is_empty() && self.create.is_empty()
    }

    /// Recreates first, then creates; one task per name.
    pub fn tasks(&self) -> Vec<RemediationTask> {
        self.recreate
            .iter()
            .map(|(name, zone)| RemediationTask::recreate(name, zone))
            .chain(self.create.iter().map(|name| RemediationTask::create(name)))
            .collect()
    }

    /// Matched records that belong to the desired fleet.
    pub fn desired_records<'a>(
        &'a self,
        config: &'a FleetConfig,
    ) -> impl Iterator<Item = &'a InstanceRecord> + 'a {
        self.matched.iter().filter(move |r| config.is_desired(&r.name))
    }
}

/// Pure diff of the desired fleet against a snapshot.
pub fn plan_cycle(config: &FleetConfig, records: &[InstanceRecord]) -> CyclePlan {
    let matched: Vec<InstanceRecord> = records
        .iter()
        .filter(|r| config.is_managed(&r.name, &r.resource_name))
        .cloned()
        .collect();

    let existing: BTreeSet<String> = matched.iter().map(|r| r.name.clone()).collect();

    let mut recreate: BTreeMap<String, String> = BTreeMap::new();
    for record in &matched {
        if !record.state.is_ready() && config.is_desired(&record.name) {
            recreate
                .entry(record.name.clone())
                .or_insert_with(|| record.zone.clone());
        }
    }

    let create: BTreeSet<String> = config
        .desired_names()
        .filter(|name| !existing.contains(*name))
        .map(str::to_string)
        .collect();

    CyclePlan {
        matched,
        existing,
        recreate,
        create,
    }
}

/// List every zone concurrently. A failing zone contributes no records.
pub async fn fetch_snapshot(provider: &dyn CloudProvider, zones: &[String]) -> Snapshot {
    let listings = join_all(zones.iter().map(|zone| async move {
        (zone, provider.list_instances(zone).await)
    }))
    .await;

    let mut snapshot = Snapshot::default();
    for (zone, listing) in listings {
        match listing {
            Ok(records) => snapshot.records.extend(records),
            Err(e) => {
                eprintln!("⚠️  [Reconciliation] Listing zone {} failed, treating it as empty: {:#}", zone, e);
                snapshot.failed_zones.push(ZoneFailure {
                    zone: zone.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    snapshot
}

/// Fleet reconciler: poll, diff, dispatch through a bounded worker pool.
pub struct Reconciler {
    config: Arc<FleetConfig>,
    provider: Arc<dyn CloudProvider>,
    remediator: Remediator,
    permits: Arc<Semaphore>,
}

impl Reconciler {
    pub fn new(
        config: Arc<FleetConfig>,
        provider: Arc<dyn CloudProvider>,
        bootstrapper: Arc<dyn InstanceBootstrapper>,
        max_concurrent_tasks: usize,
    ) -> Self {
        let remediator = Remediator::new(config.clone(), provider.clone(), bootstrapper);
        Self {
            config,
            provider,
            remediator,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn remediator(&self) -> &Remediator {
        &self.remediator
    }

    /// Fetch and diff without dispatching anything.
    pub async fn plan(&self) -> Result<(Snapshot, CyclePlan)> {
        let snapshot = fetch_snapshot(self.provider.as_ref(), &self.config.zones).await;
        if !self.config.zones.is_empty() && snapshot.failed_zones.len() == self.config.zones.len() {
            // Nothing was observed; acting on it would try to create the whole fleet.
            bail!(
                "all {} zone listings failed: {}",
                snapshot.failed_zones.len(),
                snapshot
                    .failed_zones
                    .iter()
                    .map(|f| f.zone.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        let plan = plan_cycle(&self.config, &snapshot.records);
        Ok((snapshot, plan))
    }

    /// One full reconciliation cycle. Task failures are reported, never returned.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(%cycle_id, "reconcile cycle starting");

        let (snapshot, plan) = self.plan().await.context("fleet snapshot unavailable")?;
        let tasks = plan.tasks();
        if !tasks.is_empty() {
            println!(
                "🔧 [Reconciliation] Dispatching {} recreate(s) and {} create(s)",
                plan.recreate.len(),
                plan.create.len()
            );
        }
        let outcomes = self.dispatch(tasks).await;

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            failed_zones: snapshot.failed_zones,
            total_matched: plan.matched.len(),
            instances: plan.desired_records(&self.config).cloned().collect(),
            outcomes,
        };
        tracing::info!(
            %cycle_id,
            dispatched = report.outcomes.len(),
            failed = report.failure_count(),
            "reconcile cycle complete"
        );
        Ok(report)
    }

    /// Run all tasks concurrently, at most `max_concurrent_tasks` at a time, and wait for every one.
    pub async fn dispatch(&self, tasks: Vec<RemediationTask>) -> Vec<TaskOutcome> {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let permits = self.permits.clone();
                let remediator = self.remediator.clone();
                let spawned = task.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .context("worker pool closed")?;
                    let start = Instant::now();
                    let res = remediator.execute(&spawned).await;
                    Ok::<_, anyhow::Error>((start.elapsed(), res))
                });
                (task, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok((elapsed, Ok(())))) => TaskOutcome::success(task, elapsed),
                Ok(Ok((elapsed, Err(e)))) => TaskOutcome::failure(task, elapsed, format!("{:#}", e)),
                Ok(Err(e)) => TaskOutcome::failure(task, Default::default(), format!("{:#}", e)),
                Err(join_err) => {
                    TaskOutcome::failure(task, Default::default(), format!("task aborted: {}", join_err))
                }
            };
            if let Some(err) = &outcome.error {
                eprintln!("❌ [Reconciliation] {} failed: {}", outcome.task, err);
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}
