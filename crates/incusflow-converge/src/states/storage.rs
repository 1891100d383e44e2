//! Storage pools, custom volumes and volume attachment

use super::{create, default_volume_type, fetch, label, put, remove, update};
use crate::context::Context;
use crate::diff::{Change, Changeset, Diff, lenient_config};
use crate::error::{Annotate, ConvergeError, Result};
use crate::outcome::Outcome;
use incusflow_client::{ConfigMap, DeviceChange, DeviceChanges, Instance, StoragePool, Volume, disk_device};
use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoragePoolPresent {
    pub name: String,
    /// `dir`, `zfs`, `btrfs`, `lvm`, `ceph`, ...
    pub driver: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn storage_pool_present(ctx: &Context, args: StoragePoolPresent) -> Result<Outcome> {
    let pools = ctx.client.storage_pools();
    let Some(current) = fetch(&pools, &args.name).await? else {
        let mut body = Map::new();
        body.insert("name".to_string(), json!(args.name));
        body.insert("driver".to_string(), json!(args.driver));
        put(&mut body, "config", args.config.as_ref());
        put(&mut body, "description", args.description.as_ref());
        return create(ctx, &pools, &args.name, Value::Object(body)).await;
    };
    if !current.driver.is_empty() && current.driver != args.driver {
        tracing::warn!(
            "storage pool {} uses driver {}, not {}; the driver cannot be changed",
            args.name,
            current.driver,
            args.driver
        );
    }
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &pools, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoragePoolName {
    pub name: String,
}

pub async fn storage_pool_absent(ctx: &Context, args: StoragePoolName) -> Result<Outcome> {
    remove(ctx, &ctx.client.storage_pools(), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoragePoolConfig {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Configuration of an existing pool; a missing pool is a precondition failure
pub async fn storage_pool_config(ctx: &Context, args: StoragePoolConfig) -> Result<Outcome> {
    let pools = ctx.client.storage_pools();
    let current = fetch(&pools, &args.name).await?.ok_or_else(|| {
        ConvergeError::Precondition(format!("{} does not exist", label::<StoragePool>(&args.name)))
    })?;
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &pools, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumePresent {
    pub name: String,
    pub pool: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    /// `filesystem` or `block`
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn volume_present(ctx: &Context, args: VolumePresent) -> Result<Outcome> {
    let volumes = ctx.client.volumes(&args.pool, &args.volume_type);
    let Some(current) = fetch(&volumes, &args.name).await? else {
        let mut body = Map::new();
        body.insert("name".to_string(), json!(args.name));
        put(&mut body, "content_type", args.content_type.as_ref());
        put(&mut body, "config", args.config.as_ref());
        put(&mut body, "description", args.description.as_ref());
        return create(ctx, &volumes, &args.name, Value::Object(body)).await;
    };
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &volumes, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeName {
    pub name: String,
    pub pool: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
}

pub async fn volume_absent(ctx: &Context, args: VolumeName) -> Result<Outcome> {
    remove(ctx, &ctx.client.volumes(&args.pool, &args.volume_type), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    pub name: String,
    pub pool: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn volume_config(ctx: &Context, args: VolumeConfig) -> Result<Outcome> {
    let volumes = ctx.client.volumes(&args.pool, &args.volume_type);
    let current = fetch(&volumes, &args.name).await?.ok_or_else(|| {
        ConvergeError::Precondition(format!(
            "{} does not exist in pool {}",
            label::<Volume>(&args.name),
            args.pool
        ))
    })?;
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &volumes, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeAttached {
    /// Volume name
    pub name: String,
    pub pool: String,
    pub instance: String,
    /// Defaults to the volume name
    #[serde(default)]
    pub device_name: Option<String>,
    /// Mount point inside the instance
    pub path: String,
}

/// Volume is attached to the instance as a `disk` device
pub async fn volume_attached(ctx: &Context, args: VolumeAttached) -> Result<Outcome> {
    let device = args.device_name.clone().unwrap_or_else(|| args.name.clone());
    let instances = ctx.client.instances();
    let instance_label = label::<Instance>(&args.instance);
    let current = fetch(&instances, &args.instance)
        .await?
        .ok_or_else(|| ConvergeError::Precondition(format!("{} does not exist", instance_label)))?;

    let mut desired = DeviceChanges::new();
    desired.insert(
        device.clone(),
        DeviceChange::Set(disk_device(&args.pool, &args.name, &args.path)),
    );
    let mut changes = Changeset::new();
    changes.devices(&current.devices, Some(&desired));

    if changes.is_empty() {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("volume {} already attached to {}", args.name, instance_label),
        ));
    }
    if ctx.dry_run {
        return Ok(Outcome::pending(
            &args.name,
            changes.diff,
            format!("volume {} would be attached to {}", args.name, instance_label),
        ));
    }
    instances
        .attach_volume(&args.instance, &device, &args.pool, &args.name, &args.path)
        .await
        .annotate("attach volume to", &instance_label)?;
    Ok(Outcome::changed(
        &args.name,
        changes.diff,
        format!("volume {} attached to {}", args.name, instance_label),
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeDetached {
    pub name: String,
    pub pool: String,
    pub instance: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// The instance has no device for this volume
///
/// A device with the same name that refers to another volume is left
/// alone.
pub async fn volume_detached(ctx: &Context, args: VolumeDetached) -> Result<Outcome> {
    let device = args.device_name.clone().unwrap_or_else(|| args.name.clone());
    let instances = ctx.client.instances();
    let instance_label = label::<Instance>(&args.instance);
    let Some(current) = fetch(&instances, &args.instance).await? else {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("{} does not exist", instance_label),
        ));
    };

    let Some(props) = current.devices.get(&device) else {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("volume {} already detached from {}", args.name, instance_label),
        ));
    };
    let attached = props.get("pool") == Some(&args.pool) && props.get("source") == Some(&args.name);
    if !attached {
        return Ok(Outcome::unchanged(
            &args.name,
            format!(
                "device {} of {} is not volume {} from pool {}",
                device, instance_label, args.name, args.pool
            ),
        ));
    }

    let mut devices = std::collections::BTreeMap::new();
    devices.insert(device.clone(), Change::new(json!(props), Value::Null));
    let mut diff = Diff::new();
    diff.nested("devices", devices);
    if ctx.dry_run {
        return Ok(Outcome::pending(
            &args.name,
            diff,
            format!("volume {} would be detached from {}", args.name, instance_label),
        ));
    }
    instances
        .detach_volume(&args.instance, &device)
        .await
        .annotate("detach volume from", &instance_label)?;
    Ok(Outcome::changed(
        &args.name,
        diff,
        format!("volume {} detached from {}", args.name, instance_label),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Applied;
    use crate::states::test_support::{args, context};
    use incusflow_client::testing::FakeIncus;

    #[tokio::test(start_paused = true)]
    async fn test_pool_lifecycle() {
        let fake = FakeIncus::new();
        let ctx = context(&fake, false);
        let spec = json!({"name": "fast", "driver": "zfs", "config": {"size": "50GiB"}});

        let created = storage_pool_present(&ctx, args(spec.clone())).await.unwrap();
        assert_eq!(created.applied, Applied::Changed);
        let body = fake.last_body("POST", "/storage-pools").unwrap();
        assert_eq!(body["driver"], "zfs");

        let again = storage_pool_present(&ctx, args(spec)).await.unwrap();
        assert_eq!(again.applied, Applied::Unchanged);

        let configured = storage_pool_config(
            &ctx,
            args(json!({"name": "fast", "config": {"zfs.clone_copy": "false"}})),
        )
        .await
        .unwrap();
        assert_eq!(configured.applied, Applied::Changed);
        let stored = fake.object("/storage-pools/fast").unwrap();
        assert_eq!(stored["config"]["size"], "50GiB");
        assert_eq!(stored["config"]["zfs.clone_copy"], "false");

        let removed = storage_pool_absent(&ctx, args(json!({"name": "fast"})))
            .await
            .unwrap();
        assert_eq!(removed.applied, Applied::Changed);
        assert!(fake.object("/storage-pools/fast").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_of_missing_pool() {
        let fake = FakeIncus::new();
        let err = storage_pool_config(
            &context(&fake, true),
            args(json!({"name": "fast", "config": {"size": "1GiB"}})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConvergeError::Precondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_present_and_config() {
        let fake = FakeIncus::new();
        fake.seed("/storage-pools/default", json!({"name": "default", "driver": "dir"}));
        let ctx = context(&fake, false);

        let created = volume_present(
            &ctx,
            args(json!({"name": "data", "pool": "default", "config": {"size": "10GiB"}})),
        )
        .await
        .unwrap();
        assert_eq!(created.applied, Applied::Changed);
        assert!(
            fake.object("/storage-pools/default/volumes/custom/data")
                .is_some()
        );

        let planned = volume_config(
            &context(&fake, true),
            args(json!({"name": "data", "pool": "default", "description": "app data"})),
        )
        .await
        .unwrap();
        assert_eq!(planned.applied, Applied::Pending);

        let updated = volume_config(
            &ctx,
            args(json!({"name": "data", "pool": "default", "description": "app data"})),
        )
        .await
        .unwrap();
        assert_eq!(updated.diff, planned.diff);

        let removed = volume_absent(&ctx, args(json!({"name": "data", "pool": "default"})))
            .await
            .unwrap();
        assert_eq!(removed.applied, Applied::Changed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_and_detach() {
        let fake = FakeIncus::new();
        fake.seed(
            "/instances/web",
            json!({
                "name": "web",
                "status": "Running",
                "devices": {"root": {"type": "disk", "path": "/", "pool": "default"}}
            }),
        );
        let ctx = context(&fake, false);
        let spec = json!({"name": "data", "pool": "default", "instance": "web", "path": "/srv/data"});

        let attached = volume_attached(&ctx, args(spec.clone())).await.unwrap();
        assert_eq!(attached.applied, Applied::Changed);
        let devices = fake.object("/instances/web").unwrap()["devices"].clone();
        assert_eq!(
            devices["data"],
            json!({"type": "disk", "pool": "default", "source": "data", "path": "/srv/data"})
        );
        assert_eq!(devices["root"]["path"], "/");

        let again = volume_attached(&ctx, args(spec)).await.unwrap();
        assert_eq!(again.applied, Applied::Unchanged);

        let other_pool = volume_detached(
            &ctx,
            args(json!({"name": "data", "pool": "other", "instance": "web"})),
        )
        .await
        .unwrap();
        assert_eq!(other_pool.applied, Applied::Unchanged);

        let detached = volume_detached(
            &ctx,
            args(json!({"name": "data", "pool": "default", "instance": "web"})),
        )
        .await
        .unwrap();
        assert_eq!(detached.applied, Applied::Changed);
        let devices = fake.object("/instances/web").unwrap()["devices"].clone();
        assert!(devices.get("data").is_none());
        assert!(devices.get("root").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_to_missing_instance() {
        let fake = FakeIncus::new();
        let err = volume_attached(
            &context(&fake, true),
            args(json!({"name": "data", "pool": "default", "instance": "ghost", "path": "/data"})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConvergeError::Precondition(_)));
    }
}
