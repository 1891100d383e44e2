//! Profiles shared by instances

use super::{create, fetch, label, put, remove, update};
use crate::context::Context;
use crate::diff::{Changeset, lenient_config};
use crate::error::{ConvergeError, Result};
use crate::outcome::Outcome;
use incusflow_client::merge::merge_devices;
use incusflow_client::{ConfigMap, DeviceChanges, DeviceMap, Profile};
use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePresent {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub devices: Option<DeviceChanges>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ProfilePresent {
    fn changes(&self, current: &Profile) -> Changeset {
        let mut changes = Changeset::new();
        changes
            .config(&current.config, self.config.as_ref())
            .devices(&current.devices, self.devices.as_ref())
            .description(&current.description, self.description.as_deref());
        changes
    }
}

pub async fn profile_present(ctx: &Context, args: ProfilePresent) -> Result<Outcome> {
    let profiles = ctx.client.profiles();
    let Some(current) = fetch(&profiles, &args.name).await? else {
        let mut body = Map::new();
        body.insert("name".to_string(), json!(args.name));
        put(&mut body, "config", args.config.as_ref());
        if let Some(changes) = &args.devices {
            // tombstones on a new profile have nothing to remove
            let mut devices = DeviceMap::new();
            merge_devices(&mut devices, changes);
            body.insert("devices".to_string(), json!(devices));
        }
        put(&mut body, "description", args.description.as_ref());
        return create(ctx, &profiles, &args.name, Value::Object(body)).await;
    };
    update(ctx, &profiles, &args.name, args.changes(&current)).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileName {
    pub name: String,
}

pub async fn profile_absent(ctx: &Context, args: ProfileName) -> Result<Outcome> {
    remove(ctx, &ctx.client.profiles(), &args.name).await
}

/// Settings of a profile that must already exist
pub async fn profile_config(ctx: &Context, args: ProfilePresent) -> Result<Outcome> {
    let profiles = ctx.client.profiles();
    let current = fetch(&profiles, &args.name).await?.ok_or_else(|| {
        ConvergeError::Precondition(format!("{} does not exist", label::<Profile>(&args.name)))
    })?;
    update(ctx, &profiles, &args.name, args.changes(&current)).await
}
