use crate::{CloudProvider, CreateRequest, InstanceBootstrapper};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tpu_fleet_common::{InstanceRecord, InstanceState};

/// Provider call as observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    List { zone: String },
    Create(CreateRequest),
    Delete { zone: String, name: String },
}

#[derive(Default)]
struct MockCloud {
    // zone -> name -> record
    zones: BTreeMap<String, BTreeMap<String, InstanceRecord>>,
    failing_zones: BTreeSet<String>,
    malformed_zones: BTreeSet<String>,
    failing_creates: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
    calls: Vec<ProviderCall>,
}

/// In-memory cloud for dry runs and tests. Created nodes come up READY immediately.
pub struct MockProvider {
    project: String,
    cloud: Mutex<MockCloud>,
    create_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            project: "mock".to_string(),
            cloud: Mutex::new(MockCloud::default()),
            create_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn resource_name(&self, zone: &str, name: &str) -> String {
        format!("projects/{}/locations/{}/nodes/{}", self.project, zone, name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockCloud> {
        // A panicking test thread must not wedge the other tasks.
        self.cloud.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_node(self, zone: &str, name: &str, state: &str) -> Self {
        self.put_node(zone, name, InstanceState::parse(state));
        self
    }

    /// Listing this zone fails as if the CLI exited non-zero.
    pub fn with_failing_zone(self, zone: &str) -> Self {
        self.lock().failing_zones.insert(zone.to_string());
        self
    }

    /// Listing this zone fails as if the CLI printed something that is not JSON.
    pub fn with_malformed_zone(self, zone: &str) -> Self {
        self.lock().malformed_zones.insert(zone.to_string());
        self
    }

    pub fn with_failing_create(self, name: &str) -> Self {
        self.lock().failing_creates.insert(name.to_string());
        self
    }

    pub fn with_failing_delete(self, name: &str) -> Self {
        self.lock().failing_deletes.insert(name.to_string());
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Simulate preemption or any other state change made behind our back.
    pub fn put_node(&self, zone: &str, name: &str, state: InstanceState) {
        let record = InstanceRecord {
            name: name.to_string(),
            resource_name: self.resource_name(zone, name),
            zone: zone.to_string(),
            state,
            create_time: Some(chrono::Utc::now()),
        };
        self.lock()
            .zones
            .entry(zone.to_string())
            .or_default()
            .insert(name.to_string(), record);
    }

    pub fn clear_failures(&self) {
        let mut cloud = self.lock();
        cloud.failing_zones.clear();
        cloud.malformed_zones.clear();
        cloud.failing_creates.clear();
        cloud.failing_deletes.clear();
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn created_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::Create(req) => Some(req.name),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::Delete { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<InstanceRecord> {
        self.lock()
            .zones
            .values()
            .find_map(|nodes| nodes.get(name).cloned())
    }

    /// Highest number of creates observed running at once.
    pub fn max_concurrent_creates(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn create_instance(&self, req: &CreateRequest) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut cloud = self.lock();
            cloud.calls.push(ProviderCall::Create(req.clone()));
            if cloud.failing_creates.contains(&req.name) {
                bail!("mock: capacity unavailable for {} in {}", req.name, req.zone);
            }
            let exists = cloud
                .zones
                .get(&req.zone)
                .is_some_and(|nodes| nodes.contains_key(&req.name));
            if exists {
                bail!("mock: {} already exists in {}", req.name, req.zone);
            }
        }
        self.put_node(&req.zone, &req.name, InstanceState::Ready);
        Ok(())
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<bool> {
        let mut cloud = self.lock();
        cloud.calls.push(ProviderCall::Delete {
            zone: zone.to_string(),
            name: name.to_string(),
        });
        if cloud.failing_deletes.contains(name) {
            bail!("mock: delete of {} in {} failed", name, zone);
        }
        Ok(cloud
            .zones
            .get_mut(zone)
            .and_then(|nodes| nodes.remove(name))
            .is_some())
    }

    async fn list_instances(&self, zone: &str) -> Result<Vec<InstanceRecord>> {
        let mut cloud = self.lock();
        cloud.calls.push(ProviderCall::List {
            zone: zone.to_string(),
        });
        if cloud.failing_zones.contains(zone) {
            bail!("mock: listing {} failed", zone);
        }
        if cloud.malformed_zones.contains(zone) {
            return Err(anyhow!("mock: unparsable TPU node listing for {}", zone));
        }
        Ok(cloud
            .zones
            .get(zone)
            .map(|nodes| nodes.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapCall {
    Setup { name: String },
    Launch { name: String, script: PathBuf },
}

#[derive(Default)]
struct BootstrapState {
    failing_setups: BTreeSet<String>,
    failing_launches: BTreeSet<String>,
    calls: Vec<BootstrapCall>,
}

/// Records setup/launch requests instead of reaching a node.
#[derive(Default)]
pub struct MockBootstrapper {
    state: Mutex<BootstrapState>,
}

impl MockBootstrapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BootstrapState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_failing_setup(self, name: &str) -> Self {
        self.lock().failing_setups.insert(name.to_string());
        self
    }

    pub fn with_failing_launch(self, name: &str) -> Self {
        self.lock().failing_launches.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<BootstrapCall> {
        self.lock().calls.clone()
    }

    pub fn launched_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BootstrapCall::Launch { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl InstanceBootstrapper for MockBootstrapper {
    async fn setup(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BootstrapCall::Setup {
            name: name.to_string(),
        });
        if state.failing_setups.contains(name) {
            bail!("mock: setup failed for {}", name);
        }
        Ok(())
    }

    async fn launch(&self, name: &str, script: &Path) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BootstrapCall::Launch {
            name: name.to_string(),
            script: script.to_path_buf(),
        });
        if state.failing_launches.contains(name) {
            bail!("mock: launch of {} failed for {}", script.display(), name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpu_fleet_common::ProvisioningModel;

    fn req(name: &str, zone: &str) -> CreateRequest {
        CreateRequest {
            name: name.into(),
            zone: zone.into(),
            accelerator_type: "v4-64".into(),
            software_version: "tpu-vm-v4-base".into(),
            provisioning: ProvisioningModel::Preemptible,
        }
    }

    #[tokio::test]
    async fn create_list_delete() {
        let mock = MockProvider::new();
        mock.create_instance(&req("a", "z1")).await.unwrap();
        let listed = mock.list_instances("z1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].state.is_ready());
        assert_eq!(listed[0].resource_name, "projects/mock/locations/z1/nodes/a");

        assert!(mock.create_instance(&req("a", "z1")).await.is_err());
        assert!(mock.delete_instance("z1", "a").await.unwrap());
        assert!(!mock.delete_instance("z1", "a").await.unwrap());
        assert!(mock.list_instances("z1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures() {
        let mock = MockProvider::new()
            .with_failing_zone("z2")
            .with_failing_create("b")
            .with_failing_delete("c")
            .with_node("z1", "c", "CREATING");
        assert!(mock.list_instances("z2").await.is_err());
        assert!(mock.create_instance(&req("b", "z1")).await.is_err());
        assert!(mock.delete_instance("z1", "c").await.is_err());
        assert_eq!(mock.node("c").unwrap().state, InstanceState::Creating);

        mock.clear_failures();
        assert!(mock.list_instances("z2").await.unwrap().is_empty());
        assert_eq!(mock.created_names(), vec!["b".to_string()]);
        assert_eq!(mock.deleted_names(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn bootstrapper_records_calls() {
        let boot = MockBootstrapper::new().with_failing_launch("b");
        boot.setup("a").await.unwrap();
        boot.launch("a", Path::new("/s/1.sh")).await.unwrap();
        assert!(boot.launch("b", Path::new("/s/2.sh")).await.is_err());
        assert_eq!(boot.calls().len(), 3);
        assert_eq!(boot.launched_names(), vec!["a".to_string(), "b".to_string()]);
    }
}
