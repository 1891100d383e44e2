//! Storage pools, custom volumes and disk attachment

use super::Collection;
use crate::client::Completion;
use crate::error::Result;
use crate::merge::{DeviceChange, DeviceChanges, DeviceProps, Patch};
use crate::model::{Instance, StoragePool};
use http::Method;
use serde_json::Value;

/// Volume type used when none is given
pub const DEFAULT_VOLUME_TYPE: &str = "custom";

/// Device properties that attach custom volume `volume` of `pool` at `path`
pub fn disk_device(pool: &str, volume: &str, path: &str) -> DeviceProps {
    [
        ("type", "disk"),
        ("pool", pool),
        ("source", volume),
        ("path", path),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Collection<'_, StoragePool> {
    /// Capacity and usage of a pool
    pub async fn resources(&self, name: &str) -> Result<Value> {
        let response = self
            .client()
            .request(
                Method::GET,
                &format!("{}/resources", self.item_path(name)),
                None,
                &[],
            )
            .await?;
        Ok(response.metadata)
    }
}

impl Collection<'_, Instance> {
    /// Attach a custom volume as disk device `device`
    pub async fn attach_volume(
        &self,
        instance: &str,
        device: &str,
        pool: &str,
        volume: &str,
        path: &str,
    ) -> Result<Completion> {
        tracing::info!("attaching volume {}/{} to {} as {}", pool, volume, instance, device);
        let mut devices = DeviceChanges::new();
        devices.insert(
            device.to_string(),
            DeviceChange::Set(disk_device(pool, volume, path)),
        );
        self.update(instance, &Patch::new().devices(devices)).await
    }

    /// Remove disk device `device`
    pub async fn detach_volume(&self, instance: &str, device: &str) -> Result<Completion> {
        tracing::info!("detaching device {} from {}", device, instance);
        let mut devices = DeviceChanges::new();
        devices.insert(device.to_string(), DeviceChange::Remove);
        self.update(instance, &Patch::new().devices(devices)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIncus;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_pool_resources() {
        let fake = FakeIncus::new();
        fake.seed("/storage-pools/default", json!({"name": "default", "driver": "dir"}));
        let client = fake.client();

        let resources = client.storage_pools().resources("default").await.unwrap();
        assert!(resources.get("space").is_some());
        assert!(client.storage_pools().resources("nope").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_and_detach_volume() {
        let fake = FakeIncus::new();
        fake.seed(
            "/instances/web",
            json!({
                "name": "web",
                "devices": {"root": {"type": "disk", "path": "/", "pool": "default"}}
            }),
        );
        let client = fake.client();
        let instances = client.instances();

        instances
            .attach_volume("web", "data", "default", "data", "/srv/data")
            .await
            .unwrap();
        let web = instances.get("web").await.unwrap().unwrap();
        assert_eq!(web.devices["data"], disk_device("default", "data", "/srv/data"));
        assert_eq!(web.devices["root"]["path"], "/");

        instances.detach_volume("web", "data").await.unwrap();
        let web = instances.get("web").await.unwrap().unwrap();
        assert!(!web.devices.contains_key("data"));
        assert!(web.devices.contains_key("root"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_crud() {
        let fake = FakeIncus::new();
        fake.seed("/storage-pools/default", json!({"name": "default"}));
        let client = fake.client();
        let volumes = client.volumes("default", DEFAULT_VOLUME_TYPE);

        volumes
            .create(json!({"name": "data", "config": {"size": "10GiB"}}))
            .await
            .unwrap();
        let data = volumes.get("data").await.unwrap().unwrap();
        assert_eq!(data.config["size"], "10GiB");
        assert_eq!(volumes.list_names().await.unwrap(), vec!["data".to_string()]);
    }
}
