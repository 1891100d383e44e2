//! Typed records for control-plane resources

use crate::merge::{ConfigMap, DeviceMap, stringify};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named entity living in one collection of the API
pub trait Resource: DeserializeOwned + Send + Sync {
    /// Human-readable kind used in messages
    const KIND: &'static str;

    /// Identity of the resource inside its collection
    fn name(&self) -> &str;
}

/// Resources carrying the shared `config`/`devices`/`description` shape
pub trait Configurable {
    fn config(&self) -> &ConfigMap;

    fn devices(&self) -> Option<&DeviceMap> {
        None
    }

    fn description(&self) -> &str;
}

macro_rules! resource {
    ($ty:ty, $kind:literal, $field:ident) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn name(&self) -> &str {
                &self.$field
            }
        }
    };
}

macro_rules! configurable {
    ($ty:ty) => {
        impl Configurable for $ty {
            fn config(&self) -> &ConfigMap {
                &self.config
            }

            fn description(&self) -> &str {
                &self.description
            }
        }
    };
    ($ty:ty, devices) => {
        impl Configurable for $ty {
            fn config(&self) -> &ConfigMap {
                &self.config
            }

            fn devices(&self) -> Option<&DeviceMap> {
                Some(&self.devices)
            }

            fn description(&self) -> &str {
                &self.description
            }
        }
    };
}

/// `null` and missing both become the default value
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts scalar values and stores their string form
fn lenient_config<'de, D>(deserializer: D) -> Result<ConfigMap, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| (k.clone(), stringify(v)))
        .collect())
}

/// Timestamps the control plane uses for "never"
fn is_zero_time(time: &DateTime<Utc>) -> bool {
    time.timestamp() <= 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(rename = "type", default)]
    pub instance_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default, deserialize_with = "nullable")]
    pub devices: DeviceMap,
    #[serde(default, deserialize_with = "nullable")]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

resource!(Instance, "instance", name);
configurable!(Instance, devices);

/// Snapshot of an instance or a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub description: String,
}

impl Snapshot {
    /// Snapshot name without an `owner/` prefix
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Expiry, ignoring the zero timestamp used for "never"
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at.filter(|t| !is_zero_time(t))
    }
}

impl Resource for Snapshot {
    const KIND: &'static str = "snapshot";

    fn name(&self) -> &str {
        self.short_name()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub used_by: Vec<String>,
}

resource!(StoragePool, "storage pool", name);
configurable!(StoragePool);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(rename = "type", default)]
    pub volume_type: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

resource!(Volume, "storage volume", name);
configurable!(Volume);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(rename = "type", default)]
    pub network_type: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
}

resource!(Network, "network", name);
configurable!(Network);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkAcl {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub egress: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub ingress: Vec<Value>,
}

resource!(NetworkAcl, "network ACL", name);
configurable!(NetworkAcl);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkForward {
    pub listen_address: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub ports: Vec<Value>,
    #[serde(default)]
    pub location: String,
}

resource!(NetworkForward, "network forward", listen_address);
configurable!(NetworkForward);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPeer {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_network: String,
    #[serde(default)]
    pub target_project: String,
    #[serde(default)]
    pub status: String,
}

resource!(NetworkPeer, "network peer", name);
configurable!(NetworkPeer);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkZone {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
}

resource!(NetworkZone, "network zone", name);
configurable!(NetworkZone);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub entries: Vec<Value>,
}

resource!(ZoneRecord, "zone record", name);
configurable!(ZoneRecord);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub config: ConfigMap,
    #[serde(default, deserialize_with = "nullable")]
    pub devices: DeviceMap,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub used_by: Vec<String>,
}

resource!(Profile, "profile", name);
configurable!(Profile, devices);

/// Alias entry embedded in an image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasRef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub fingerprint: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default, deserialize_with = "lenient_config")]
    pub properties: ConfigMap,
    #[serde(default, deserialize_with = "nullable")]
    pub aliases: Vec<AliasRef>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub compression_algorithm: Option<String>,
    #[serde(rename = "type", default)]
    pub image_type: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub size: u64,
}

resource!(Image, "image", fingerprint);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAlias {
    pub name: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub alias_type: String,
}

resource!(ImageAlias, "image alias", name);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub server_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "nullable")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub failure_domain: String,
    #[serde(default)]
    pub description: String,
}

resource!(ClusterMember, "cluster member", server_name);

/// Global server settings (`GET /1.0`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: ConfigMap,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub environment: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_from_api() {
        let instance: Instance = serde_json::from_value(json!({
            "name": "web",
            "type": "container",
            "status": "Running",
            "config": {"limits.cpu": "2"},
            "devices": null,
            "profiles": ["default"],
            "created_at": "2024-05-01T10:00:00.123456789Z",
            "unknown_field": 42
        }))
        .unwrap();

        assert_eq!(instance.name(), "web");
        assert_eq!(instance.instance_type, "container");
        assert!(instance.is_running());
        assert!(instance.devices.is_empty());
        assert_eq!(instance.config["limits.cpu"], "2");
        assert!(instance.created_at.is_some());
        assert_eq!(Instance::KIND, "instance");
    }

    #[test]
    fn test_snapshot_names_and_expiry() {
        let snap: Snapshot = serde_json::from_value(json!({
            "name": "web/daily-1",
            "created_at": "2024-05-01T10:00:00Z",
            "expires_at": "0001-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(snap.name(), "daily-1");
        assert!(snap.expiry().is_none());

        let snap: Snapshot = serde_json::from_value(json!({
            "name": "daily-2",
            "expires_at": "2030-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(snap.name(), "daily-2");
        assert!(snap.expiry().is_some());
        assert!(snap.created_at.is_none());
    }

    #[test]
    fn test_forward_and_member_identity() {
        let forward: NetworkForward =
            serde_json::from_value(json!({"listen_address": "10.0.0.1", "ports": null})).unwrap();
        assert_eq!(forward.name(), "10.0.0.1");
        assert!(forward.ports.is_empty());

        let member: ClusterMember =
            serde_json::from_value(json!({"server_name": "node1", "status": "Online"})).unwrap();
        assert_eq!(member.name(), "node1");
    }

    #[test]
    fn test_settings_config_is_lenient() {
        let settings: ServerSettings = serde_json::from_value(json!({
            "config": {"core.https_address": ":8443", "images.auto_update_interval": 6},
            "api_version": "1.0"
        }))
        .unwrap();
        assert_eq!(settings.config["images.auto_update_interval"], "6");
        assert_eq!(settings.config["core.https_address"], ":8443");
    }

    #[test]
    fn test_configurable_profile() {
        let profile: Profile = serde_json::from_value(json!({
            "name": "default",
            "devices": {"root": {"type": "disk", "path": "/", "pool": "default"}},
            "description": "Default profile"
        }))
        .unwrap();
        let shared: &dyn Configurable = &profile;
        assert_eq!(shared.description(), "Default profile");
        assert_eq!(shared.devices().unwrap()["root"]["pool"], "default");
        assert!(shared.config().is_empty());
    }
}
