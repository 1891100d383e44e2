//! State functions
//!
//! Every function takes the run [`Context`] and a typed argument struct
//! and converges one resource:
//!
//! 1. fetch the current object
//! 2. absent and wanted: create it (the diff is the creation payload)
//! 3. present and unwanted: delete it
//! 4. present and wanted: diff per field and send only changed sections
//!
//! In a dry run steps 2 to 4 stop after computing the diff and report
//! [`Applied::Pending`](crate::Applied::Pending).

pub mod cluster;
pub mod image;
pub mod instance;
pub mod network;
pub mod profile;
pub mod settings;
pub mod snapshot;
pub mod storage;

use crate::context::Context;
use crate::diff::{Changeset, Diff};
use crate::error::{Annotate, Result};
use crate::outcome::Outcome;
use incusflow_client::{Collection, Resource};
use serde_json::Value;

fn default_volume_type() -> String {
    incusflow_client::DEFAULT_VOLUME_TYPE.to_string()
}

/// `"<kind> <name>"`, used in messages and errors
pub(crate) fn label<T: Resource>(name: &str) -> String {
    format!("{} {}", T::KIND, name)
}

pub(crate) async fn fetch<T: Resource>(
    collection: &Collection<'_, T>,
    name: &str,
) -> Result<Option<T>> {
    collection.get(name).await.annotate("get", &label::<T>(name))
}

pub(crate) async fn create<T: Resource>(
    ctx: &Context,
    collection: &Collection<'_, T>,
    name: &str,
    payload: Value,
) -> Result<Outcome> {
    let label = label::<T>(name);
    let diff = Diff::creation(&payload);
    if ctx.dry_run {
        return Ok(Outcome::pending(name, diff, format!("{} would be created", label)));
    }
    collection.create(payload).await.annotate("create", &label)?;
    Ok(Outcome::changed(name, diff, format!("{} created", label)).with_realized(name))
}

pub(crate) async fn update<T: Resource>(
    ctx: &Context,
    collection: &Collection<'_, T>,
    name: &str,
    changes: Changeset,
) -> Result<Outcome> {
    let label = label::<T>(name);
    if changes.is_empty() {
        return Ok(Outcome::unchanged(
            name,
            format!("{} already in desired state", label),
        ));
    }
    if ctx.dry_run {
        return Ok(Outcome::pending(
            name,
            changes.diff,
            format!("{} would be updated", label),
        ));
    }
    collection
        .update(name, &changes.patch)
        .await
        .annotate("update", &label)?;
    Ok(Outcome::changed(name, changes.diff, format!("{} updated", label)))
}

/// Delete `name` when it exists
pub(crate) async fn remove<T: Resource>(
    ctx: &Context,
    collection: &Collection<'_, T>,
    name: &str,
) -> Result<Outcome> {
    let label = label::<T>(name);
    if fetch(collection, name).await?.is_none() {
        return Ok(Outcome::unchanged(name, format!("{} already absent", label)));
    }
    let diff = Diff::removal(&removal_key::<T>(), name);
    if ctx.dry_run {
        return Ok(Outcome::pending(name, diff, format!("{} would be deleted", label)));
    }
    collection.delete(name).await.annotate("delete", &label)?;
    Ok(Outcome::changed(name, diff, format!("{} deleted", label)))
}

/// Diff key for a deleted resource, e.g. `storage_pool`
fn removal_key<T: Resource>() -> String {
    T::KIND.to_lowercase().replace(' ', "_")
}

/// Insert `value` under `key` when present
pub(crate) fn put<V: serde::Serialize>(
    body: &mut serde_json::Map<String, Value>,
    key: &str,
    value: Option<V>,
) {
    if let Some(value) = value
        && let Ok(value) = serde_json::to_value(value)
    {
        body.insert(key.to_string(), value);
    }
}
