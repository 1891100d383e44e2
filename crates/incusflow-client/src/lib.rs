//! Async client for the Incus control-plane REST API
//!
//! This crate talks to an Incus server over its local Unix socket or over
//! HTTPS, and turns the server's asynchronous operations back into plain
//! `async fn` calls.
//!
//! ```text
//!   Collection<'_, Instance> ──┐
//!   Collection<'_, Image>    ──┼─► IncusClient ──► Transport ──► control plane
//!   ServerSettingsApi        ──┘        │          (unix | https)
//!                                       └─► poll /1.0/operations/<id>
//! ```
//!
//! # Features
//!
//! - `request` / `sync_request`: one request, or one request plus a wait
//!   for the operation it started
//! - typed collections with list/get/create/update/rename/delete
//! - merge-aware updates that keep unmentioned config keys and devices
//! - image import from remote servers and local files, alias management
//! - instance state changes, exec, readiness and cloud-init waits
//!
//! # Example
//!
//! ```ignore
//! use incusflow_client::IncusClient;
//!
//! let client = IncusClient::unix("/var/lib/incus/unix.socket");
//! for instance in client.instances().list().await? {
//!     println!("{} {}", instance.name, instance.status);
//! }
//! client.instances().start("web").await?;
//! ```

pub mod client;
pub mod error;
pub mod merge;
pub mod model;
pub mod operation;
pub mod resources;
pub mod transport;
pub mod wait;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ClientOptions, Completion, IncusClient, Response, ResponseKind, encode_segment};
pub use error::{ClientError, Result};
pub use merge::{ConfigMap, DeviceChange, DeviceChanges, DeviceMap, DeviceProps, Patch};
pub use model::{
    ClusterMember, Configurable, Image, ImageAlias, Instance, Network, NetworkAcl, NetworkForward,
    NetworkPeer, NetworkZone, Profile, Resource, ServerSettings, Snapshot, StoragePool, Volume,
    ZoneRecord,
};
pub use operation::{Operation, OperationRef, OperationStatus};
pub use resources::{
    ClusterApi, Collection, ExecResult, FileImport, PublishOptions, RemoteImage,
    DEFAULT_VOLUME_TYPE, ServerSettingsApi, SnapshotOptions, StateAction, StateChange, disk_device,
};
pub use transport::{Body, HttpRequest, HttpResponse, HttpsTransport, Transport, UnixTransport};
pub use wait::{WaitPolicy, poll_until};
