use std::sync::Arc;
use tpu_fleet_common::FleetConfig;
use tpu_fleet_providers::command::CommandSpec;
use tpu_fleet_providers::launcher::LauncherCli;
use tpu_fleet_providers::{CloudProvider, InstanceBootstrapper};

use crate::settings::Settings;

pub struct ProviderManager;

impl ProviderManager {
    pub fn get_provider(
        settings: &Settings,
        config: &FleetConfig,
    ) -> Option<Arc<dyn CloudProvider>> {
        let _ = config; // unused when only the mock is compiled in
        match settings.provider.as_str() {
            #[cfg(feature = "provider-gcloud")]
            "gcloud" => Some(Arc::new(
                tpu_fleet_providers::gcloud::GcloudProvider::new(
                    settings.gcloud_bin.clone(),
                    config.project.clone(),
                ),
            )),
            #[cfg(feature = "provider-mock")]
            "mock" => Some(Arc::new(tpu_fleet_providers::mock::MockProvider::new())),
            _ => None,
        }
    }

    /// The mock provider pairs with the mock bootstrapper: nothing real to set up.
    pub fn get_bootstrapper(settings: &Settings) -> Option<Arc<dyn InstanceBootstrapper>> {
        match settings.provider.as_str() {
            #[cfg(feature = "provider-mock")]
            "mock" => Some(Arc::new(tpu_fleet_providers::mock::MockBootstrapper::new())),
            _ => {
                let base = CommandSpec::from_command_line(&settings.launcher_cmd)?;
                Some(Arc::new(LauncherCli::new(base)))
            }
        }
    }
}
