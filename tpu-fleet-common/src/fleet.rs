use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::name_filter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read fleet config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid fleet config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("fleet config must list at least one zone to poll")]
    NoZones,
    #[error("capacity class {0} is defined twice")]
    DuplicateClass(String),
    #[error("instance {name} is in both capacity classes {first} and {second}")]
    DuplicateMember {
        name: String,
        first: String,
        second: String,
    },
    #[error("instance {0} has a launch script but belongs to no capacity class")]
    Unpartitioned(String),
    #[error("instance {name} is a member of capacity class {class} but has no launch script")]
    MissingScript { name: String, class: String },
    #[error("capacity class {class} creates in zone {zone}, which is not polled")]
    UnpolledZone { class: String, zone: String },
    #[error("capacity class {class}: no default software version for accelerator type {accelerator_type}")]
    UnknownSoftwareVersion {
        class: String,
        accelerator_type: String,
    },
    #[error("capacity class {0} must allow at least one create attempt")]
    ZeroAttempts(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningModel {
    #[default]
    Preemptible,
    Spot,
}

impl ProvisioningModel {
    pub fn as_flag(&self) -> &'static str {
        match self {
            ProvisioningModel::Preemptible => "--preemptible",
            ProvisioningModel::Spot => "--spot",
        }
    }
}

fn default_create_attempts() -> u32 {
    1
}

fn default_create_retry_delay_secs() -> u64 {
    60
}

/// A set of fleet members that share creation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityClass {
    pub name: String,
    pub accelerator_type: String,
    #[serde(default)]
    pub software_version: Option<String>,
    pub zone: String,
    #[serde(default)]
    pub provisioning: ProvisioningModel,
    /// Create attempts per task. 1 means a single attempt; the next cycle is the retry.
    #[serde(default = "default_create_attempts")]
    pub create_attempts: u32,
    #[serde(default = "default_create_retry_delay_secs")]
    pub create_retry_delay_secs: u64,
    pub members: BTreeSet<String>,
}

impl CapacityClass {
    /// Explicit software version, or the runtime image matching the accelerator generation.
    pub fn software_version(&self) -> Option<String> {
        if let Some(v) = self.software_version.as_deref().map(str::trim) {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
        default_software_version(&self.accelerator_type).map(str::to_string)
    }

    pub fn create_retry_delay(&self) -> Duration {
        Duration::from_secs(self.create_retry_delay_secs)
    }
}

/// Default runtime image per accelerator generation.
pub fn default_software_version(accelerator_type: &str) -> Option<&'static str> {
    let t = accelerator_type.trim().to_ascii_lowercase();
    if t.starts_with("v5e") || t.starts_with("v5litepod") {
        Some("v2-alpha-tpuv5-lite")
    } else if t.starts_with("v4") {
        Some("tpu-vm-v4-base")
    } else if t.starts_with("v3") {
        Some("tpu-ubuntu2204-base")
    } else {
        None
    }
}

/// Immutable description of the fleet the reconciler maintains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Cloud project passed to the provisioning CLI; the CLI default is used when absent.
    #[serde(default)]
    pub project: Option<String>,
    pub zones: Vec<String>,
    /// Name patterns identifying managed nodes (see [`name_filter`]).
    pub managed_prefixes: Vec<String>,
    pub classes: Vec<CapacityClass>,
    /// Desired fleet: instance name -> local launch script.
    pub scripts: BTreeMap<String, PathBuf>,
}

impl FleetConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: FleetConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.iter().all(|z| z.trim().is_empty()) {
            return Err(ConfigError::NoZones);
        }

        let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
        let mut class_names: BTreeSet<&str> = BTreeSet::new();
        for class in &self.classes {
            if !class_names.insert(class.name.as_str()) {
                return Err(ConfigError::DuplicateClass(class.name.clone()));
            }
            if class.create_attempts == 0 {
                return Err(ConfigError::ZeroAttempts(class.name.clone()));
            }
            if class.software_version().is_none() {
                return Err(ConfigError::UnknownSoftwareVersion {
                    class: class.name.clone(),
                    accelerator_type: class.accelerator_type.clone(),
                });
            }
            if !self.zones.iter().any(|z| z == &class.zone) {
                return Err(ConfigError::UnpolledZone {
                    class: class.name.clone(),
                    zone: class.zone.clone(),
                });
            }
            for member in &class.members {
                if let Some(first) = owner.insert(member.as_str(), class.name.as_str()) {
                    return Err(ConfigError::DuplicateMember {
                        name: member.clone(),
                        first: first.to_string(),
                        second: class.name.clone(),
                    });
                }
                if !self.scripts.contains_key(member) {
                    return Err(ConfigError::MissingScript {
                        name: member.clone(),
                        class: class.name.clone(),
                    });
                }
            }
        }

        if let Some(name) = self.scripts.keys().find(|n| !owner.contains_key(n.as_str())) {
            return Err(ConfigError::Unpartitioned(name.clone()));
        }

        Ok(())
    }

    /// Non-fatal findings worth logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, class) in self.scripts.keys().filter_map(|n| Some((n, self.class_for(n)?))) {
            let resource = format!(
                "projects/{}/locations/{}/nodes/{}",
                self.project.as_deref().unwrap_or("-"),
                class.zone,
                name
            );
            if !name_filter::is_managed(name, &resource, &self.managed_prefixes) {
                out.push(format!(
                    "instance {} does not match any managed prefix; it will be created every cycle",
                    name
                ));
            }
        }
        for (name, script) in &self.scripts {
            if !script.exists() {
                out.push(format!(
                    "launch script for {} not found at {}",
                    name,
                    script.display()
                ));
            }
        }
        out
    }

    pub fn is_desired(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    pub fn desired_names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    pub fn script_for(&self, name: &str) -> Option<&Path> {
        self.scripts.get(name).map(PathBuf::as_path)
    }

    pub fn class_for(&self, name: &str) -> Option<&CapacityClass> {
        self.classes.iter().find(|c| c.members.contains(name))
    }

    pub fn is_managed(&self, name: &str, resource_name: &str) -> bool {
        name_filter::is_managed(name, resource_name, &self.managed_prefixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "project": "my-project",
        "zones": ["europe-west4-a", "us-central2-b"],
        "managed_prefixes": ["v3spot", "v4spot"],
        "classes": [
            {
                "name": "v3-256",
                "accelerator_type": "v3-256",
                "zone": "europe-west4-a",
                "provisioning": "spot",
                "members": ["v3spot-a"]
            },
            {
                "name": "v4-64",
                "accelerator_type": "v4-64",
                "software_version": "tpu-vm-v4-base",
                "zone": "us-central2-b",
                "create_attempts": 3,
                "members": ["v4spot-a", "v4spot-b"]
            }
        ],
        "scripts": {
            "v3spot-a": "/tmp/1.sh",
            "v4spot-a": "/tmp/2.sh",
            "v4spot-b": "/tmp/3.sh"
        }
    }"#;

    #[test]
    fn parses_and_validates_sample() {
        let cfg = FleetConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.desired_names().count(), 3);
        assert!(cfg.is_desired("v4spot-b"));
        assert!(!cfg.is_desired("v4spot-z"));

        let v3 = cfg.class_for("v3spot-a").unwrap();
        assert_eq!(v3.provisioning, ProvisioningModel::Spot);
        assert_eq!(v3.create_attempts, 1);
        assert_eq!(v3.software_version().as_deref(), Some("tpu-ubuntu2204-base"));

        let v4 = cfg.class_for("v4spot-b").unwrap();
        assert_eq!(v4.provisioning, ProvisioningModel::Preemptible);
        assert_eq!(v4.create_attempts, 3);
        assert_eq!(v4.create_retry_delay(), Duration::from_secs(60));
        assert_eq!(cfg.script_for("v4spot-b"), Some(Path::new("/tmp/3.sh")));
    }

    #[test]
    fn software_version_defaults() {
        assert_eq!(default_software_version("v3-128"), Some("tpu-ubuntu2204-base"));
        assert_eq!(default_software_version("v4-32"), Some("tpu-vm-v4-base"));
        assert_eq!(default_software_version("v5e-16"), Some("v2-alpha-tpuv5-lite"));
        assert_eq!(default_software_version("v5litepod-8"), Some("v2-alpha-tpuv5-lite"));
        assert_eq!(default_software_version("a100"), None);
    }

    #[test]
    fn rejects_unpartitioned_script() {
        let raw = SAMPLE.replace(r#""v4spot-b": "/tmp/3.sh""#, r#""v4spot-b": "/tmp/3.sh", "stray": "/tmp/4.sh""#);
        match FleetConfig::from_json_str(&raw) {
            Err(ConfigError::Unpartitioned(name)) => assert_eq!(name, "stray"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_double_membership() {
        let raw = SAMPLE.replace(r#""members": ["v3spot-a"]"#, r#""members": ["v3spot-a", "v4spot-a"]"#);
        match FleetConfig::from_json_str(&raw) {
            Err(ConfigError::DuplicateMember { name, .. }) => assert_eq!(name, "v4spot-a"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_member_without_script() {
        let raw = SAMPLE.replace(r#""v4spot-a", "v4spot-b""#, r#""v4spot-a", "v4spot-b", "v4spot-c""#);
        assert!(matches!(
            FleetConfig::from_json_str(&raw),
            Err(ConfigError::MissingScript { .. })
        ));
    }

    #[test]
    fn rejects_unpolled_class_zone() {
        let raw = SAMPLE.replace(r#""zones": ["europe-west4-a", "us-central2-b"]"#, r#""zones": ["europe-west4-a"]"#);
        assert!(matches!(
            FleetConfig::from_json_str(&raw),
            Err(ConfigError::UnpolledZone { .. })
        ));
    }

    #[test]
    fn rejects_unknown_accelerator_without_version() {
        let raw = SAMPLE.replace(r#""accelerator_type": "v3-256""#, r#""accelerator_type": "gpu-a100""#);
        assert!(matches!(
            FleetConfig::from_json_str(&raw),
            Err(ConfigError::UnknownSoftwareVersion { .. })
        ));
    }

    #[test]
    fn rejects_empty_zones_and_bad_json() {
        let raw = SAMPLE.replace(r#""zones": ["europe-west4-a", "us-central2-b"]"#, r#""zones": []"#);
        assert!(matches!(FleetConfig::from_json_str(&raw), Err(ConfigError::NoZones)));
        assert!(matches!(FleetConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn warns_on_unmanaged_desired_name() {
        let raw = SAMPLE.replace(r#""managed_prefixes": ["v3spot", "v4spot"]"#, r#""managed_prefixes": ["v3spot"]"#);
        let cfg = FleetConfig::from_json_str(&raw).unwrap();
        let warnings = cfg.warnings();
        assert!(warnings.iter().any(|w| w.contains("v4spot-a") && w.contains("managed prefix")));
        assert!(!warnings.iter().any(|w| w.contains("v3spot-a") && w.contains("managed prefix")));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = FleetConfig::load(file.path()).unwrap();
        assert_eq!(cfg.project.as_deref(), Some("my-project"));

        let missing = FleetConfig::load(Path::new("/nonexistent/fleet.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
