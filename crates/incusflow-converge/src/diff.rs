//! Field-level differences between current and desired state
//!
//! A [`Diff`] maps a changed field to `{old, new}`. The `config` and
//! `devices` sections are nested one level and diff per key or per device.
//! [`Changeset`] builds a diff and the matching [`Patch`] side by side, so
//! the diff reported in a dry run is exactly what a real run sends.

use incusflow_client::merge::{merge_config, stringify};
use incusflow_client::{ConfigMap, DeviceChange, DeviceChanges, DeviceMap, Patch};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};

/// Old and new value of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub old: Value,
    pub new: Value,
}

impl Change {
    pub fn new(old: impl Into<Value>, new: impl Into<Value>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// One entry of a [`Diff`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DiffEntry {
    Field(Change),
    Nested(BTreeMap<String, Change>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diff(BTreeMap<String, DiffEntry>);

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every top-level field of a creation payload, going from `null`
    pub fn creation(payload: &Value) -> Self {
        let mut diff = Self::new();
        if let Some(object) = payload.as_object() {
            for (key, value) in object {
                diff.insert(key.clone(), Change::new(Value::Null, value.clone()));
            }
        }
        diff
    }

    /// `{field: {old: name, new: null}}`
    pub fn removal(field: &str, name: &str) -> Self {
        let mut diff = Self::new();
        diff.insert(field, Change::new(name, Value::Null));
        diff
    }

    pub fn insert(&mut self, field: impl Into<String>, change: Change) {
        self.0.insert(field.into(), DiffEntry::Field(change));
    }

    /// Add a nested section; empty sections are skipped
    pub fn nested(&mut self, field: impl Into<String>, changes: BTreeMap<String, Change>) {
        if !changes.is_empty() {
            self.0.insert(field.into(), DiffEntry::Nested(changes));
        }
    }

    pub fn get(&self, field: &str) -> Option<&DiffEntry> {
        self.0.get(field)
    }

    /// Change of a nested key, e.g. `("config", "limits.cpu")`
    pub fn get_nested(&self, field: &str, key: &str) -> Option<&Change> {
        match self.0.get(field)? {
            DiffEntry::Nested(changes) => changes.get(key),
            DiffEntry::Field(_) => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn optional(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |v| json!(v))
}

fn device_value(device: Option<&BTreeMap<String, String>>) -> Value {
    device.map_or(Value::Null, |props| json!(props))
}

/// Desired keys whose value differs from `current`
pub fn config_delta(current: &ConfigMap, desired: &ConfigMap) -> BTreeMap<String, Change> {
    desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), Change::new(optional(current.get(key)), value.as_str())))
        .collect()
}

/// Exact comparison in both directions, for replace semantics
pub fn config_replace_delta(current: &ConfigMap, desired: &ConfigMap) -> BTreeMap<String, Change> {
    let mut changes = config_delta(current, desired);
    for (key, value) in current {
        if !desired.contains_key(key) {
            changes.insert(key.clone(), Change::new(value.as_str(), Value::Null));
        }
    }
    changes
}

/// Per-device changes, compared after merging desired properties
///
/// A `Set` device that already carries every desired property is
/// unchanged; `Remove` only produces a change when the device exists.
pub fn device_delta(current: &DeviceMap, desired: &DeviceChanges) -> BTreeMap<String, Change> {
    let mut changes = BTreeMap::new();
    for (name, change) in desired {
        let existing = current.get(name);
        match change {
            DeviceChange::Set(props) => {
                let mut merged = existing.cloned().unwrap_or_default();
                merge_config(&mut merged, props);
                if existing != Some(&merged) {
                    changes.insert(
                        name.clone(),
                        Change::new(device_value(existing), json!(merged)),
                    );
                }
            }
            DeviceChange::Remove => {
                if existing.is_some() {
                    changes.insert(name.clone(), Change::new(device_value(existing), Value::Null));
                }
            }
        }
    }
    changes
}

/// Set-equality comparison of two name lists
pub fn set_delta(current: &[String], desired: &[String]) -> Option<Change> {
    let current_set: BTreeSet<&String> = current.iter().collect();
    let desired_set: BTreeSet<&String> = desired.iter().collect();
    (current_set != desired_set).then(|| Change::new(json!(current), json!(desired)))
}

pub fn value_delta(current: Value, desired: Value) -> Option<Change> {
    (current != desired).then(|| Change::new(current, desired))
}

/// Diff and patch for an existing resource, built together
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub diff: Diff,
    pub patch: Patch,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    /// Merge-compare `desired` config keys; only changed keys are sent
    pub fn config(&mut self, current: &ConfigMap, desired: Option<&ConfigMap>) -> &mut Self {
        let Some(desired) = desired else {
            return self;
        };
        let delta = config_delta(current, desired);
        if !delta.is_empty() {
            let changed: ConfigMap = delta
                .keys()
                .filter_map(|key| desired.get(key).map(|value| (key.clone(), value.clone())))
                .collect();
            self.patch.config = Some(changed);
            self.diff.nested("config", delta);
        }
        self
    }

    pub fn devices(&mut self, current: &DeviceMap, desired: Option<&DeviceChanges>) -> &mut Self {
        let Some(desired) = desired else {
            return self;
        };
        let delta = device_delta(current, desired);
        if !delta.is_empty() {
            let changed: DeviceChanges = delta
                .keys()
                .filter_map(|name| desired.get(name).map(|change| (name.clone(), change.clone())))
                .collect();
            self.patch.devices = Some(changed);
            self.diff.nested("devices", delta);
        }
        self
    }

    pub fn description(&mut self, current: &str, desired: Option<&str>) -> &mut Self {
        if let Some(desired) = desired
            && current != desired
        {
            self.diff.insert("description", Change::new(current, desired));
            self.patch.description = Some(desired.to_string());
        }
        self
    }

    /// Top-level field compared and sent as a whole
    pub fn field(&mut self, name: &str, current: Value, desired: Option<Value>) -> &mut Self {
        if let Some(desired) = desired
            && let Some(change) = value_delta(current, desired.clone())
        {
            self.diff.insert(name, change);
            self.patch.fields.insert(name.to_string(), desired);
        }
        self
    }

    /// Top-level name list compared as a set
    pub fn set_field(&mut self, name: &str, current: &[String], desired: Option<&[String]>) -> &mut Self {
        if let Some(desired) = desired
            && let Some(change) = set_delta(current, desired)
        {
            self.diff.insert(name, change);
            self.patch.fields.insert(name.to_string(), json!(desired));
        }
        self
    }

    /// Non-patch fields as a JSON map, for APIs that take raw fields
    pub fn fields(&self) -> Map<String, Value> {
        self.patch.fields.clone()
    }
}

/// Accept scalar config values in declarative files and keep their
/// string form, the representation the control plane stores
pub fn lenient_config<'de, D>(deserializer: D) -> Result<Option<ConfigMap>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|map| map.iter().map(|(k, v)| (k.clone(), stringify(v))).collect()))
}

/// ACL rules and forward ports: scalar fields in string form
pub fn lenient_entries<'de, D>(deserializer: D) -> Result<Option<Vec<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|entries| coerce_entries(entries, &[])))
}

/// DNS record entries: `ttl` is an integer, the other fields strings
pub fn lenient_records<'de, D>(deserializer: D) -> Result<Option<Vec<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|entries| coerce_entries(entries, &["ttl"])))
}

/// Coerce the fields of each object in `entries` to the control plane's
/// representation: strings, except `numeric` keys which become integers
pub fn coerce_entries(entries: Vec<Value>, numeric: &[&str]) -> Vec<Value> {
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| {
                        let value = if numeric.contains(&key.as_str()) {
                            integer(value)
                        } else {
                            scalar_string(value)
                        };
                        (key, value)
                    })
                    .collect(),
            ),
            other => other,
        })
        .collect()
}

fn scalar_string(value: Value) -> Value {
    match value {
        Value::Number(_) | Value::Bool(_) => Value::String(stringify(&value)),
        other => other,
    }
}

fn integer(value: Value) -> Value {
    if let Some(number) = value.as_str().and_then(|s| s.trim().parse::<u64>().ok()) {
        return Value::from(number);
    }
    value
}
