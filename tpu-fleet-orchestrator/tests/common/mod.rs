// Shared fixtures for reconciler tests. Everything runs against the in-memory mock cloud.
#![allow(dead_code)]

use std::sync::Arc;
use tpu_fleet_common::FleetConfig;
use tpu_fleet_orchestrator::Reconciler;
use tpu_fleet_providers::mock::{MockBootstrapper, MockProvider};
use tpu_fleet_providers::InstanceBootstrapper;

/// Fleet with one capacity class per zone; `members` is (name, zone).
pub fn fleet(zones: &[&str], members: &[(&str, &str)]) -> FleetConfig {
    let classes: Vec<serde_json::Value> = zones
        .iter()
        .map(|zone| {
            let names: Vec<&str> = members
                .iter()
                .filter(|(_, z)| z == zone)
                .map(|(n, _)| *n)
                .collect();
            serde_json::json!({
                "name": format!("class-{}", zone),
                "accelerator_type": "v4-8",
                "zone": zone,
                "members": names,
            })
        })
        .collect();
    let scripts: serde_json::Map<String, serde_json::Value> = members
        .iter()
        .map(|(n, _)| (n.to_string(), serde_json::json!(format!("/scripts/{}.sh", n))))
        .collect();
    let raw = serde_json::json!({
        "project": "mock",
        "zones": zones,
        "managed_prefixes": ["pod-"],
        "classes": classes,
        "scripts": scripts,
    });
    FleetConfig::from_json_str(&raw.to_string()).expect("valid test fleet")
}

pub fn reconciler(
    config: FleetConfig,
    provider: Arc<MockProvider>,
    bootstrapper: Arc<dyn InstanceBootstrapper>,
    max_concurrent_tasks: usize,
) -> Reconciler {
    Reconciler::new(Arc::new(config), provider, bootstrapper, max_concurrent_tasks)
}

pub fn mock_reconciler(
    config: FleetConfig,
    provider: Arc<MockProvider>,
) -> (Reconciler, Arc<MockBootstrapper>) {
    let boot = Arc::new(MockBootstrapper::new());
    (reconciler(config, provider, boot.clone(), 32), boot)
}

pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}
