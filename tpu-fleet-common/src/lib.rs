use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod fleet;
pub mod name_filter;

pub use fleet::{CapacityClass, ConfigError, FleetConfig, ProvisioningModel};

// --- Enums ---

/// Lifecycle state reported by the provisioning CLI for a node.
/// Only READY counts as healthy; everything else is a recreate candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Ready,
    Creating,
    Other(String),
}

impl InstanceState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "READY" => InstanceState::Ready,
            "CREATING" => InstanceState::Creating,
            other => InstanceState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Ready => "READY",
            InstanceState::Creating => "CREATING",
            InstanceState::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, InstanceState::Ready)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for InstanceState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InstanceState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(InstanceState::parse(&raw))
    }
}

// --- Entities ---

/// One node from a zone listing. Read-only snapshot, rebuilt every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Short node name (last segment of `resource_name`).
    pub name: String,
    /// Full resource path, e.g. `projects/p/locations/z/nodes/n`.
    pub resource_name: String,
    pub zone: String,
    pub state: InstanceState,
    pub create_time: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    /// Build a record from the raw fields of a listing entry.
    /// `listed_zone` is used when the resource path does not carry one.
    pub fn from_listing(
        resource_name: &str,
        state: Option<&str>,
        create_time: Option<&str>,
        listed_zone: &str,
    ) -> Self {
        Self {
            name: short_name(resource_name).to_string(),
            resource_name: resource_name.to_string(),
            zone: zone_from_resource(resource_name)
                .unwrap_or(listed_zone)
                .to_string(),
            state: InstanceState::parse(state.unwrap_or("UNKNOWN")),
            create_time: create_time.and_then(parse_create_time),
        }
    }
}

/// Last `/`-separated segment of a resource path.
pub fn short_name(resource_name: &str) -> &str {
    resource_name.rsplit('/').next().unwrap_or(resource_name)
}

/// Zone from `.../locations/<zone>/...`, if present.
pub fn zone_from_resource(resource_name: &str) -> Option<&str> {
    let mut parts = resource_name.split('/');
    while let Some(part) = parts.next() {
        if part == "locations" {
            return parts.next().filter(|z| !z.is_empty());
        }
    }
    None
}

/// Parse a CLI timestamp such as `2024-03-01T10:22:31.123456789Z`.
/// Falls back to whole seconds (fractional part dropped) when the value is not RFC 3339.
pub fn parse_create_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let seconds = raw.split('.').next().unwrap_or(raw);
    NaiveDateTime::parse_from_str(seconds, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parse() {
        assert_eq!(InstanceState::parse("READY"), InstanceState::Ready);
        assert_eq!(InstanceState::parse("ready"), InstanceState::Ready);
        assert_eq!(InstanceState::parse("CREATING"), InstanceState::Creating);
        assert_eq!(
            InstanceState::parse("PREEMPTED"),
            InstanceState::Other("PREEMPTED".to_string())
        );
        assert!(!InstanceState::parse("PREEMPTED").is_ready());
        assert_eq!(InstanceState::parse("preempted").as_str(), "PREEMPTED");
    }

    #[test]
    fn record_from_listing() {
        let rec = InstanceRecord::from_listing(
            "projects/my-project/locations/europe-west4-a/nodes/v3spot-1",
            Some("READY"),
            Some("2024-03-01T10:22:31.123456789Z"),
            "us-central2-b",
        );
        assert_eq!(rec.name, "v3spot-1");
        assert_eq!(rec.zone, "europe-west4-a");
        assert!(rec.state.is_ready());
        assert_eq!(
            rec.create_time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            Some("2024-03-01 10:22:31".to_string())
        );
    }

    #[test]
    fn record_without_path_or_fields() {
        let rec = InstanceRecord::from_listing("bare-node", None, Some("garbage"), "zone-x");
        assert_eq!(rec.name, "bare-node");
        assert_eq!(rec.zone, "zone-x");
        assert_eq!(rec.state, InstanceState::Other("UNKNOWN".to_string()));
        assert!(rec.create_time.is_none());
    }

    #[test]
    fn create_time_without_offset() {
        let t = parse_create_time("2023-12-24T08:00:01.5").unwrap();
        assert_eq!(t.format("%H:%M:%S").to_string(), "08:00:01");
    }

    #[test]
    fn state_serializes_as_raw_string() {
        let json = serde_json::to_string(&InstanceState::Other("STOPPED".into())).unwrap();
        assert_eq!(json, "\"STOPPED\"");
        let back: InstanceState = serde_json::from_str("\"READY\"").unwrap();
        assert_eq!(back, InstanceState::Ready);
    }
}
