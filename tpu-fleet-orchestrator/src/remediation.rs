use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tpu_fleet_common::FleetConfig;
use tpu_fleet_providers::{CloudProvider, CreateRequest, InstanceBootstrapper};

use crate::logger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationAction {
    /// Missing from every listing: create, setup, launch.
    Create,
    /// Listed but not READY: delete in `zone`, then create, setup, launch.
    Recreate { zone: String },
}

/// One unit of work for the worker pool. Lives for a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationTask {
    pub name: String,
    pub action: RemediationAction,
}

impl RemediationTask {
    pub fn create(name: &str) -> Self {
        Self {
            name: name.to_string(),
            action: RemediationAction::Create,
        }
    }

    pub fn recreate(name: &str, zone: &str) -> Self {
        Self {
            name: name.to_string(),
            action: RemediationAction::Recreate {
                zone: zone.to_string(),
            },
        }
    }
}

impl fmt::Display for RemediationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            RemediationAction::Create => write!(f, "create {}", self.name),
            RemediationAction::Recreate { zone } => write!(f, "recreate {} ({})", self.name, zone),
        }
    }
}

/// Executes remediation tasks against the provisioning and bootstrap collaborators.
/// Cheap to clone; every spawned task gets its own handle.
#[derive(Clone)]
pub struct Remediator {
    config: Arc<FleetConfig>,
    provider: Arc<dyn CloudProvider>,
    bootstrapper: Arc<dyn InstanceBootstrapper>,
}

impl Remediator {
    pub fn new(
        config: Arc<FleetConfig>,
        provider: Arc<dyn CloudProvider>,
        bootstrapper: Arc<dyn InstanceBootstrapper>,
    ) -> Self {
        Self {
            config,
            provider,
            bootstrapper,
        }
    }

    pub async fn execute(&self, task: &RemediationTask) -> Result<()> {
        match &task.action {
            RemediationAction::Create => self.create_setup_and_launch(&task.name).await,
            RemediationAction::Recreate { zone } => self.recreate(&task.name, zone).await,
        }
    }

    /// Destroy (failure tolerated), then the full create sequence.
    pub async fn recreate(&self, name: &str, zone: &str) -> Result<()> {
        println!("\n♻️  Recreating {} (destroy + create/setup/launch).", name);
        if let Err(e) = self.destroy(zone, name).await {
            // The node is unhealthy either way; a failed delete surfaces again through create.
            eprintln!("⚠️  Destroy of {} failed, continuing with create: {:#}", name, e);
        }
        self.create_setup_and_launch(name).await
    }

    /// Returns false when the node was already gone.
    pub async fn destroy(&self, zone: &str, name: &str) -> Result<bool> {
        println!("=== Destroying TPU for {}...", name);
        let start = Instant::now();
        let log_id = logger::log_event_with_metadata(
            "INSTANCE_DELETE",
            "in_progress",
            name,
            None,
            Some(serde_json::json!({ "zone": zone })),
        );
        match self.provider.delete_instance(zone, name).await {
            Ok(deleted) => {
                if !deleted {
                    logger::log_quick("INSTANCE_ALREADY_GONE", name, Some(zone));
                }
                logger::log_event_complete(log_id, "INSTANCE_DELETE", "success", elapsed_ms(start), None);
                Ok(deleted)
            }
            Err(e) => {
                let msg = format!("{:#}", e);
                logger::log_event_complete(log_id, "INSTANCE_DELETE", "failed", elapsed_ms(start), Some(&msg));
                Err(e)
            }
        }
    }

    /// Create, setup and launch sequentially. The first failing step fails the task;
    /// earlier steps are not rolled back.
    pub async fn create_setup_and_launch(&self, name: &str) -> Result<()> {
        let class = self
            .config
            .class_for(name)
            .ok_or_else(|| anyhow!("{} belongs to no capacity class", name))?;
        let script = self
            .config
            .script_for(name)
            .ok_or_else(|| anyhow!("{} has no launch script", name))?;
        let req = CreateRequest::for_member(name, class).ok_or_else(|| {
            anyhow!(
                "no software version for {} ({})",
                name,
                class.accelerator_type
            )
        })?;

        println!("=== Creating TPU for {}...", name);
        self.step("INSTANCE_CREATE", name, self.create_with_attempts(&req, class.create_attempts, class.create_retry_delay()))
            .await?;

        println!("=== Setting up TPU for {}...", name);
        self.step("INSTANCE_SETUP", name, self.bootstrapper.setup(name))
            .await?;

        println!("=== Launching TPU for {}...", name);
        self.step("SCRIPT_LAUNCH", name, self.bootstrapper.launch(name, script))
            .await?;

        println!("✅ {} created, set up and launched", name);
        Ok(())
    }

    async fn create_with_attempts(
        &self,
        req: &CreateRequest,
        attempts: u32,
        retry_delay: std::time::Duration,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.provider.create_instance(req).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    eprintln!(
                        "⚠️  Create attempt {}/{} for {} failed: {:#}. Retrying in {}s",
                        attempt,
                        attempts,
                        req.name,
                        e,
                        retry_delay.as_secs()
                    );
                    tokio::time::sleep(retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("gave up creating {} after {} attempt(s)", req.name, attempt)
                    })
                }
            }
        }
    }

    async fn step<F>(&self, action_type: &str, name: &str, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let start = Instant::now();
        let log_id = logger::log_event(action_type, "in_progress", name, None);
        match fut.await {
            Ok(()) => {
                logger::log_event_complete(log_id, action_type, "success", elapsed_ms(start), None);
                Ok(())
            }
            Err(e) => {
                let msg = format!("{:#}", e);
                logger::log_event_complete(log_id, action_type, "failed", elapsed_ms(start), Some(&msg));
                Err(e)
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
