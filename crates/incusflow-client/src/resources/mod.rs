//! Resource accessors
//!
//! Every resource kind is served by the same [`Collection`] shape:
//! `list`, `get`, `create`, `update` (read-merge-write), `replace`,
//! `rename` and `delete`. Kind-specific calls (state changes, image
//! import, snapshot restore, ...) are added as inherent methods on
//! `Collection<'_, Kind>` in the submodules.

mod cluster;
mod images;
mod instances;
mod networks;
mod settings;
mod snapshots;
mod storage;

pub use cluster::ClusterApi;
pub use images::{FileImport, RemoteImage};
pub use instances::{ExecResult, PublishOptions, StateAction, StateChange};
pub use settings::ServerSettingsApi;
pub use snapshots::SnapshotOptions;
pub use storage::{DEFAULT_VOLUME_TYPE, disk_device};

use crate::client::{Completion, IncusClient, encode_segment};
use crate::error::Result;
use crate::merge::Patch;
use crate::model::{
    ClusterMember, Image, ImageAlias, Instance, Network, NetworkAcl, NetworkForward, NetworkPeer,
    NetworkZone, Profile, Resource, Snapshot, StoragePool, Volume, ZoneRecord,
};
use http::Method;
use serde_json::{Value, json};
use std::marker::PhantomData;

/// Generic accessor for one collection of the API
pub struct Collection<'c, T> {
    client: &'c IncusClient,
    path: String,
    _kind: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Collection<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("path", &self.path).finish()
    }
}

impl<'c, T: Resource> Collection<'c, T> {
    pub(crate) fn new(client: &'c IncusClient, path: String) -> Self {
        Self {
            client,
            path,
            _kind: PhantomData,
        }
    }

    pub fn client(&self) -> &'c IncusClient {
        self.client
    }

    /// Collection path relative to the API root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of one item
    pub fn item_path(&self, name: &str) -> String {
        format!("{}/{}", self.path, encode_segment(name))
    }

    /// Full objects of every item (`recursion=1`)
    pub async fn list(&self) -> Result<Vec<T>> {
        let response = self
            .client
            .request(Method::GET, &self.path, None, &[("recursion", "1")])
            .await?;
        let items = if response.metadata.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(response.metadata)?
        };
        Ok(items)
    }

    /// Names of every item (`recursion=0`)
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .request(Method::GET, &self.path, None, &[("recursion", "0")])
            .await?;
        let urls: Vec<String> = if response.metadata.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(response.metadata)?
        };
        Ok(urls.iter().map(|url| name_from_url(url)).collect())
    }

    /// Fetch one item; `Ok(None)` when the control plane answers 404
    pub async fn get(&self, name: &str) -> Result<Option<T>> {
        match self.get_raw(name).await {
            Ok(value) => Ok(Some(serde_json::from_value(value)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch one item as raw JSON
    pub async fn get_raw(&self, name: &str) -> Result<Value> {
        let response = self
            .client
            .request(Method::GET, &self.item_path(name), None, &[])
            .await?;
        Ok(response.metadata)
    }

    pub async fn create(&self, body: Value) -> Result<Completion> {
        tracing::info!("creating {} in {}", T::KIND, self.path);
        self.client
            .sync_request(Method::POST, &self.path, Some(body), &[])
            .await
    }

    /// Read-modify-write update: fetch, merge `patch`, PUT the full object
    pub async fn update(&self, name: &str, patch: &Patch) -> Result<Completion> {
        let mut current = self.get_raw(name).await?;
        patch.apply_to(&mut current)?;
        tracing::info!("updating {} {}", T::KIND, name);
        self.client
            .sync_request(Method::PUT, &self.item_path(name), Some(current), &[])
            .await
    }

    /// PUT `body` as the complete new object
    pub async fn replace(&self, name: &str, body: Value) -> Result<Completion> {
        tracing::info!("replacing {} {}", T::KIND, name);
        self.client
            .sync_request(Method::PUT, &self.item_path(name), Some(body), &[])
            .await
    }

    pub async fn rename(&self, name: &str, new_name: &str) -> Result<Completion> {
        tracing::info!("renaming {} {} to {}", T::KIND, name, new_name);
        self.client
            .sync_request(
                Method::POST,
                &self.item_path(name),
                Some(json!({ "name": new_name })),
                &[],
            )
            .await
    }

    pub async fn delete(&self, name: &str) -> Result<Completion> {
        self.delete_with(name, &[]).await
    }

    pub async fn delete_with(&self, name: &str, query: &[(&str, &str)]) -> Result<Completion> {
        tracing::info!("deleting {} {}", T::KIND, name);
        self.client
            .sync_request(Method::DELETE, &self.item_path(name), None, query)
            .await
    }
}

/// Last path segment of an item URL, percent-decoded
fn name_from_url(url: &str) -> String {
    let path = url.split('?').next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Accessors for every resource kind
impl IncusClient {
    pub fn instances(&self) -> Collection<'_, Instance> {
        Collection::new(self, "/instances".to_string())
    }

    pub fn instance_snapshots(&self, instance: &str) -> Collection<'_, Snapshot> {
        Collection::new(
            self,
            format!("/instances/{}/snapshots", encode_segment(instance)),
        )
    }

    pub fn storage_pools(&self) -> Collection<'_, StoragePool> {
        Collection::new(self, "/storage-pools".to_string())
    }

    pub fn volumes(&self, pool: &str, volume_type: &str) -> Collection<'_, Volume> {
        Collection::new(
            self,
            format!(
                "/storage-pools/{}/volumes/{}",
                encode_segment(pool),
                encode_segment(volume_type)
            ),
        )
    }

    pub fn volume_snapshots(
        &self,
        pool: &str,
        volume_type: &str,
        volume: &str,
    ) -> Collection<'_, Snapshot> {
        Collection::new(
            self,
            format!(
                "/storage-pools/{}/volumes/{}/{}/snapshots",
                encode_segment(pool),
                encode_segment(volume_type),
                encode_segment(volume)
            ),
        )
    }

    pub fn networks(&self) -> Collection<'_, Network> {
        Collection::new(self, "/networks".to_string())
    }

    pub fn network_forwards(&self, network: &str) -> Collection<'_, NetworkForward> {
        Collection::new(self, format!("/networks/{}/forwards", encode_segment(network)))
    }

    pub fn network_peers(&self, network: &str) -> Collection<'_, NetworkPeer> {
        Collection::new(self, format!("/networks/{}/peers", encode_segment(network)))
    }

    pub fn network_acls(&self) -> Collection<'_, NetworkAcl> {
        Collection::new(self, "/network-acls".to_string())
    }

    pub fn network_zones(&self) -> Collection<'_, NetworkZone> {
        Collection::new(self, "/network-zones".to_string())
    }

    pub fn zone_records(&self, zone: &str) -> Collection<'_, ZoneRecord> {
        Collection::new(
            self,
            format!("/network-zones/{}/records", encode_segment(zone)),
        )
    }

    pub fn profiles(&self) -> Collection<'_, Profile> {
        Collection::new(self, "/profiles".to_string())
    }

    pub fn images(&self) -> Collection<'_, Image> {
        Collection::new(self, "/images".to_string())
    }

    pub fn image_aliases(&self) -> Collection<'_, ImageAlias> {
        Collection::new(self, "/images/aliases".to_string())
    }

    pub fn cluster_members(&self) -> Collection<'_, ClusterMember> {
        Collection::new(self, "/cluster/members".to_string())
    }

    pub fn cluster(&self) -> ClusterApi<'_> {
        ClusterApi::new(self)
    }

    pub fn server_settings(&self) -> ServerSettingsApi<'_> {
        ServerSettingsApi::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIncus;

    #[test]
    fn test_name_from_url() {
        assert_eq!(name_from_url("/1.0/instances/web"), "web");
        assert_eq!(name_from_url("/1.0/instances/web%20server"), "web server");
        assert_eq!(
            name_from_url("/1.0/storage-pools/default/volumes/custom/data?project=x"),
            "data"
        );
    }

    #[test]
    fn test_paths_are_encoded() {
        let fake = FakeIncus::new();
        let client = fake.client();
        assert_eq!(
            client.volumes("default", "custom").item_path("my vol"),
            "/storage-pools/default/volumes/custom/my%20vol"
        );
        assert_eq!(
            client.instance_snapshots("web").path(),
            "/instances/web/snapshots"
        );
        assert_eq!(
            client.network_forwards("br0").item_path("10.0.0.1"),
            "/networks/br0/forwards/10.0.0.1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crud_cycle() {
        let fake = FakeIncus::new();
        let client = fake.client();
        let profiles = client.profiles();

        assert!(profiles.get("web").await.unwrap().is_none());

        profiles
            .create(json!({"name": "web", "config": {"limits.cpu": "2"}, "description": ""}))
            .await
            .unwrap();
        let names = profiles.list_names().await.unwrap();
        assert_eq!(names, vec!["web".to_string()]);

        let patch = Patch::new()
            .config([("limits.memory".to_string(), "4GB".to_string())].into())
            .description("web tier");
        profiles.update("web", &patch).await.unwrap();

        let web = profiles.get("web").await.unwrap().unwrap();
        assert_eq!(web.config["limits.cpu"], "2");
        assert_eq!(web.config["limits.memory"], "4GB");
        assert_eq!(web.description, "web tier");

        profiles.rename("web", "frontend").await.unwrap();
        assert!(profiles.get("web").await.unwrap().is_none());
        assert!(profiles.get("frontend").await.unwrap().is_some());

        profiles.delete("frontend").await.unwrap();
        assert!(profiles.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_propagate_unchanged() {
        let fake = FakeIncus::new();
        let client = fake.client();

        let err = client.networks().delete("missing").await.unwrap_err();
        assert_eq!(err.error_code(), Some(404));

        let err = client
            .networks()
            .update("missing", &Patch::new().description("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.mutation_count(), 0);
    }
}
