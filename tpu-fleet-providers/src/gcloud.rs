use crate::command::{self, CommandError, CommandSpec};
use crate::{CloudProvider, CreateRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tpu_fleet_common::InstanceRecord;

/// TPU VM provisioning through the `gcloud` CLI. Credentials are the CLI's own.
pub struct GcloudProvider {
    bin: String,
    project: Option<String>,
}

/// Subset of a `gcloud compute tpus tpu-vm list --format=json` entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TpuNode {
    name: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
}

impl GcloudProvider {
    pub fn new(bin: impl Into<String>, project: Option<String>) -> Self {
        let project = project
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Self {
            bin: bin.into(),
            project,
        }
    }

    fn base(&self) -> CommandSpec {
        CommandSpec::new(&self.bin).args(["compute", "tpus", "tpu-vm"])
    }

    fn with_project(&self, spec: CommandSpec) -> CommandSpec {
        match &self.project {
            Some(p) => spec.arg(format!("--project={}", p)),
            None => spec,
        }
    }

    pub fn list_command(&self, zone: &str) -> CommandSpec {
        self.with_project(
            self.base()
                .arg("list")
                .arg(format!("--zone={}", zone))
                .arg("--format=json"),
        )
    }

    pub fn create_command(&self, req: &CreateRequest) -> CommandSpec {
        self.with_project(
            self.base()
                .arg("create")
                .arg(&req.name)
                .arg(format!("--zone={}", req.zone))
                .arg(format!("--accelerator-type={}", req.accelerator_type))
                .arg(format!("--version={}", req.software_version))
                .arg(req.provisioning.as_flag()),
        )
    }

    pub fn delete_command(&self, zone: &str, name: &str) -> CommandSpec {
        self.with_project(
            self.base()
                .arg("delete")
                .arg(name)
                .arg(format!("--zone={}", zone))
                .arg("--quiet"),
        )
    }
}

/// Parse list output. Empty output means no nodes in the zone.
pub fn parse_node_list(stdout: &str, zone: &str) -> Result<Vec<InstanceRecord>> {
    if stdout.trim().is_empty() {
        return Ok(vec![]);
    }
    let nodes: Vec<TpuNode> =
        serde_json::from_str(stdout).context("unparsable TPU node listing")?;
    Ok(nodes
        .into_iter()
        .map(|n| {
            InstanceRecord::from_listing(
                &n.name,
                n.state.as_deref(),
                n.create_time.as_deref(),
                zone,
            )
        })
        .collect())
}

/// Only a NOT_FOUND naming the node itself means "already gone"; a missing
/// project or zone is a real failure.
fn is_node_not_found(err: &CommandError, name: &str) -> bool {
    let stderr = err.stderr();
    if !stderr.contains("NOT_FOUND") {
        return false;
    }
    let needle = format!("nodes/{}", name);
    stderr.match_indices(&needle).any(|(at, _)| {
        stderr[at + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    })
}

#[async_trait]
impl CloudProvider for GcloudProvider {
    async fn create_instance(&self, req: &CreateRequest) -> Result<()> {
        command::run(&self.create_command(req))
            .await
            .with_context(|| format!("failed to create TPU {} in {}", req.name, req.zone))?;
        Ok(())
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<bool> {
        match command::run(&self.delete_command(zone, name)).await {
            Ok(_) => Ok(true),
            Err(e) if is_node_not_found(&e, name) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete TPU {} in {}", name, zone)),
        }
    }

    async fn list_instances(&self, zone: &str) -> Result<Vec<InstanceRecord>> {
        let out = command::run(&self.list_command(zone))
            .await
            .with_context(|| format!("failed to list TPUs in {}", zone))?;
        parse_node_list(&out.stdout, zone).with_context(|| format!("zone {}", zone))
    }
}
