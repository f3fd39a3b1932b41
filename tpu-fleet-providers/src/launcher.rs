use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use crate::command::{self, CommandSpec};
use crate::InstanceBootstrapper;

/// Drives the external launcher CLI (`<launcher> setup|launch ... --project <name>`).
/// The launcher owns the remote shell/copy transport.
pub struct LauncherCli {
    base: CommandSpec,
}

impl LauncherCli {
    pub fn new(base: CommandSpec) -> Self {
        Self { base }
    }

    pub fn setup_command(&self, name: &str) -> CommandSpec {
        self.base
            .clone()
            .args(["setup", "--project", name])
    }

    pub fn launch_command(&self, name: &str, script: &Path) -> CommandSpec {
        self.base
            .clone()
            .arg("launch")
            .arg(script.to_string_lossy())
            .args(["--project", name])
    }
}

#[async_trait]
impl InstanceBootstrapper for LauncherCli {
    async fn setup(&self, name: &str) -> Result<()> {
        command::run(&self.setup_command(name))
            .await
            .with_context(|| format!("setup failed for {}", name))?;
        Ok(())
    }

    async fn launch(&self, name: &str, script: &Path) -> Result<()> {
        command::run(&self.launch_command(name, script))
            .await
            .with_context(|| format!("launch of {} failed for {}", script.display(), name))?;
        Ok(())
    }
}
