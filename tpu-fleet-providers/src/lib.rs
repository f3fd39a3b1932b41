use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tpu_fleet_common::{CapacityClass, InstanceRecord, ProvisioningModel};

pub mod command;
pub mod launcher;

/// Narrow provisioning surface used by the reconciler.
/// Implementations shell out to a cloud CLI (or fake it in tests).
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Single creation attempt. Fails if the cloud rejects the request.
    async fn create_instance(&self, req: &CreateRequest) -> Result<()>;

    /// Delete a node. Returns false when the node was already gone.
    async fn delete_instance(&self, zone: &str, name: &str) -> Result<bool>;

    // For Reconciliation
    async fn list_instances(&self, zone: &str) -> Result<Vec<InstanceRecord>>;
}

/// Installs the runtime environment on a node and starts its workload.
#[async_trait]
pub trait InstanceBootstrapper: Send + Sync {
    async fn setup(&self, name: &str) -> Result<()>;
    async fn launch(&self, name: &str, script: &Path) -> Result<()>;
}

/// Parameters for one instance creation, resolved from the member's capacity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub zone: String,
    pub accelerator_type: String,
    pub software_version: String,
    pub provisioning: ProvisioningModel,
}

impl CreateRequest {
    /// Returns None when the class cannot resolve a software version.
    pub fn for_member(name: &str, class: &CapacityClass) -> Option<Self> {
        Some(Self {
            name: name.to_string(),
            zone: class.zone.clone(),
            accelerator_type: class.accelerator_type.clone(),
            software_version: class.software_version()?,
            provisioning: class.provisioning,
        })
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "gcloud")]
pub mod gcloud;
