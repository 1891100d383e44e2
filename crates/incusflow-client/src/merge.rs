//! Merge rules for read-modify-write updates
//!
//! - `config` merges per key; keys not mentioned are preserved.
//! - `devices` merge per device: properties of an existing device are
//!   merged, unmentioned devices are untouched, and
//!   [`DeviceChange::Remove`] deletes a device.
//! - every other field replaces the current value.

use crate::error::{ClientError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flat `config` map
pub type ConfigMap = BTreeMap<String, String>;
/// Properties of one device
pub type DeviceProps = BTreeMap<String, String>;
/// `devices` map
pub type DeviceMap = BTreeMap<String, DeviceProps>;
/// Desired changes per device name
pub type DeviceChanges = BTreeMap<String, DeviceChange>;

/// Marker used in declarative files for a device that must not exist
pub const DEVICE_ABSENT: &str = "absent";

/// Desired state of one device
///
/// `Set` with an empty map means "the device exists"; it never removes
/// anything. Removal is only ever expressed by `Remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    Set(DeviceProps),
    Remove,
}

impl Serialize for DeviceChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DeviceChange::Set(props) => props.serialize(serializer),
            DeviceChange::Remove => serializer.serialize_str(DEVICE_ABSENT),
        }
    }
}

impl<'de> Deserialize<'de> for DeviceChange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Props(BTreeMap<String, Value>),
            Marker(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Props(props) => Ok(DeviceChange::Set(stringify_map(&props))),
            Repr::Marker(marker) if marker == DEVICE_ABSENT => Ok(DeviceChange::Remove),
            Repr::Marker(other) => Err(D::Error::custom(format!(
                "expected a device property map or \"{}\", got {:?}",
                DEVICE_ABSENT, other
            ))),
        }
    }
}

/// String form the control plane uses for a config value
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn stringify_map(map: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), stringify(v))).collect()
}

/// Merge `desired` into `current`, keeping keys `desired` does not mention
pub fn merge_config(current: &mut ConfigMap, desired: &ConfigMap) {
    for (key, value) in desired {
        current.insert(key.clone(), value.clone());
    }
}

/// Apply per-device changes to `current`
pub fn merge_devices(current: &mut DeviceMap, changes: &DeviceChanges) {
    for (name, change) in changes {
        match change {
            DeviceChange::Set(props) => {
                let device = current.entry(name.clone()).or_default();
                merge_config(device, props);
            }
            DeviceChange::Remove => {
                current.remove(name);
            }
        }
    }
}

/// Fields to change on a resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub config: Option<ConfigMap>,
    pub devices: Option<DeviceChanges>,
    pub description: Option<String>,
    /// Top-level fields replaced as a whole (profiles, ports, rules, ...)
    pub fields: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ConfigMap) -> Self {
        self.config = Some(config);
        self
    }

    pub fn devices(mut self, devices: DeviceChanges) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_none()
            && self.devices.is_none()
            && self.description.is_none()
            && self.fields.is_empty()
    }

    /// Apply the patch to a resource object fetched from the control plane
    pub fn apply_to(&self, resource: &mut Value) -> Result<()> {
        let object = resource.as_object_mut().ok_or_else(|| {
            ClientError::Decode("expected a JSON object for the resource".to_string())
        })?;

        if let Some(config) = &self.config {
            let current = object
                .entry("config")
                .or_insert_with(|| Value::Object(Map::new()));
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Some(map) = current.as_object_mut() {
                for (key, value) in config {
                    map.insert(key.clone(), Value::String(value.clone()));
                }
            }
        }

        if let Some(devices) = &self.devices {
            let current = object
                .entry("devices")
                .or_insert_with(|| Value::Object(Map::new()));
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Some(map) = current.as_object_mut() {
                for (name, change) in devices {
                    match change {
                        DeviceChange::Set(props) => {
                            let device = map
                                .entry(name.clone())
                                .or_insert_with(|| Value::Object(Map::new()));
                            if !device.is_object() {
                                *device = Value::Object(Map::new());
                            }
                            if let Some(device) = device.as_object_mut() {
                                for (key, value) in props {
                                    device.insert(key.clone(), Value::String(value.clone()));
                                }
                            }
                        }
                        DeviceChange::Remove => {
                            map.remove(name);
                        }
                    }
                }
            }
        }

        if let Some(description) = &self.description {
            object.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }

        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }

        Ok(())
    }
}
