//! Instance and volume snapshots, retention

use super::{default_volume_type, fetch, label, remove};
use crate::context::Context;
use crate::diff::{Change, Diff};
use crate::error::{Annotate, ConvergeError, Result};
use crate::outcome::Outcome;
use crate::rotation::{self, RotationPolicy, RotationReport};
use chrono::{DateTime, SecondsFormat, Utc};
use incusflow_client::{Collection, Resource, Snapshot, SnapshotOptions};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parent of a snapshot collection must exist
async fn require_parent<T: Resource>(collection: &Collection<'_, T>, name: &str) -> Result<()> {
    if fetch(collection, name).await?.is_none() {
        return Err(ConvergeError::Precondition(format!(
            "{} does not exist",
            label::<T>(name)
        )));
    }
    Ok(())
}

fn snapshot_payload(name: &str, options: &SnapshotOptions) -> Value {
    let mut body = Map::new();
    body.insert("name".to_string(), json!(name));
    if options.stateful {
        body.insert("stateful".to_string(), json!(true));
    }
    if let Some(description) = &options.description {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(expires_at) = &options.expires_at {
        body.insert("expires_at".to_string(), json!(timestamp(expires_at)));
    }
    Value::Object(body)
}

/// Snapshot `name` exists; description and expiry converge when given
async fn ensure_snapshot(
    ctx: &Context,
    snapshots: &Collection<'_, Snapshot>,
    owner: &str,
    name: &str,
    options: SnapshotOptions,
) -> Result<Outcome> {
    let label = format!("snapshot {}/{}", owner, name);
    let current = snapshots.get(name).await.annotate("get", &label)?;

    let Some(current) = current else {
        let diff = Diff::creation(&snapshot_payload(name, &options));
        if ctx.dry_run {
            return Ok(Outcome::pending(name, diff, format!("{} would be created", label)));
        }
        snapshots.take(name, &options).await.annotate("create", &label)?;
        return Ok(Outcome::changed(name, diff, format!("{} created", label)).with_realized(name));
    };

    let mut diff = Diff::new();
    let description = options
        .description
        .as_deref()
        .filter(|d| *d != current.description);
    if let Some(description) = description {
        diff.insert(
            "description",
            Change::new(current.description.as_str(), description),
        );
    }
    let expires_at = options
        .expires_at
        .as_ref()
        .filter(|t| current.expiry().as_ref() != Some(*t));
    if let Some(expires_at) = expires_at {
        diff.insert(
            "expires_at",
            Change::new(
                current.expiry().map_or(Value::Null, |t| json!(timestamp(&t))),
                timestamp(expires_at),
            ),
        );
    }

    if diff.is_empty() {
        return Ok(Outcome::unchanged(name, format!("{} already exists", label)));
    }
    if ctx.dry_run {
        return Ok(Outcome::pending(name, diff, format!("{} would be updated", label)));
    }
    snapshots
        .update_snapshot(name, description, expires_at)
        .await
        .annotate("update", &label)?;
    Ok(Outcome::changed(name, diff, format!("{} updated", label)))
}

fn rotation_outcome(name: &str, report: RotationReport, what: &str) -> Outcome {
    if report.deleted.is_empty() {
        return Outcome::unchanged(
            name,
            format!("{}: {} matching snapshot(s), nothing to rotate", what, report.matched),
        );
    }
    let mut diff = Diff::new();
    diff.insert("deleted", Change::new(json!(report.deleted), Value::Null));
    if report.dry_run {
        Outcome::pending(
            name,
            diff,
            format!("{}: {} snapshot(s) would be deleted", what, report.deleted.len()),
        )
    } else {
        Outcome::changed(
            name,
            diff,
            format!("{}: {} snapshot(s) deleted", what, report.deleted.len()),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSnapshotPresent {
    pub instance: String,
    pub name: String,
    /// Include runtime state (memory) in the snapshot
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn instance_snapshot_present(
    ctx: &Context,
    args: InstanceSnapshotPresent,
) -> Result<Outcome> {
    require_parent(&ctx.client.instances(), &args.instance).await?;
    let options = SnapshotOptions {
        stateful: args.stateful,
        description: args.description,
        expires_at: args.expires_at,
    };
    let snapshots = ctx.client.instance_snapshots(&args.instance);
    ensure_snapshot(ctx, &snapshots, &args.instance, &args.name, options).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSnapshotName {
    pub instance: String,
    pub name: String,
}

/// Snapshot does not exist; a missing instance has no snapshots either
pub async fn instance_snapshot_absent(
    ctx: &Context,
    args: InstanceSnapshotName,
) -> Result<Outcome> {
    if fetch(&ctx.client.instances(), &args.instance).await?.is_none() {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("instance {} does not exist", args.instance),
        ));
    }
    remove(ctx, &ctx.client.instance_snapshots(&args.instance), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSnapshotRestored {
    pub instance: String,
    pub name: String,
    #[serde(default)]
    pub stateful: bool,
}

/// Roll the instance back to a snapshot
///
/// There is no way to observe that a restore already happened, so every
/// real run restores and reports a change.
pub async fn instance_snapshot_restored(
    ctx: &Context,
    args: InstanceSnapshotRestored,
) -> Result<Outcome> {
    require_parent(&ctx.client.instances(), &args.instance).await?;
    let snapshots = ctx.client.instance_snapshots(&args.instance);
    let label = format!("snapshot {}/{}", args.instance, args.name);
    if snapshots.get(&args.name).await.annotate("get", &label)?.is_none() {
        return Err(ConvergeError::Precondition(format!("{} does not exist", label)));
    }

    let mut diff = Diff::new();
    diff.insert("restored", Change::new(Value::Null, args.name.as_str()));
    if ctx.dry_run {
        return Ok(Outcome::pending(
            &args.instance,
            diff,
            format!("instance {} would be restored to {}", args.instance, args.name),
        ));
    }
    snapshots
        .restore(&args.name, args.stateful)
        .await
        .annotate("restore", &label)?;
    Ok(Outcome::changed(
        &args.instance,
        diff,
        format!("instance {} restored to {}", args.instance, args.name),
    ))
}

/// One entry of [`InstanceSnapshotsManaged::snapshots`]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagedSnapshot {
    pub name: String,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Rotation applies only when both `pattern` and `keep` are set
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub keep: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSnapshotsManaged {
    pub instance: String,
    /// Keyed by a free-form identifier, e.g. `daily`, `weekly`
    pub snapshots: BTreeMap<String, ManagedSnapshot>,
}

/// Create each named snapshot when missing, then rotate its pattern
///
/// Rotation sees the snapshots this call creates, so a dry run reports
/// the same deletions a real run performs.
pub async fn instance_snapshots_managed(
    ctx: &Context,
    args: InstanceSnapshotsManaged,
) -> Result<Outcome> {
    require_parent(&ctx.client.instances(), &args.instance).await?;

    let mut policies = Vec::new();
    for (id, config) in &args.snapshots {
        if config.name.trim().is_empty() {
            return Err(ConvergeError::Validation(format!(
                "snapshot entry '{}' has an empty name",
                id
            )));
        }
        if let (Some(pattern), Some(keep)) = (&config.pattern, config.keep) {
            policies.push(RotationPolicy::new(pattern, keep)?);
        }
    }

    let snapshots = ctx.client.instance_snapshots(&args.instance);
    let mut current = snapshots
        .list()
        .await
        .annotate("list snapshots of", &format!("instance {}", args.instance))?;

    let mut created = Vec::new();
    for config in args.snapshots.values() {
        if current.iter().any(|s| s.short_name() == config.name) {
            continue;
        }
        if !ctx.dry_run {
            let options = SnapshotOptions {
                stateful: config.stateful,
                description: config.description.clone(),
                expires_at: config.expires_at,
            };
            snapshots
                .take(&config.name, &options)
                .await
                .annotate("create", &format!("snapshot {}/{}", args.instance, config.name))?;
        }
        created.push(config.name.clone());
        current.push(Snapshot {
            name: config.name.clone(),
            created_at: Some(Utc::now()),
            ..Default::default()
        });
    }

    let mut rotated = Vec::new();
    for policy in &policies {
        let plan = policy.plan(&current);
        current.retain(|s| !plan.delete.iter().any(|d| d == s.short_name()));
        let report = rotation::execute(&snapshots, plan, ctx.dry_run).await?;
        rotated.extend(report.deleted);
    }

    let name = format!("{}_snapshots", args.instance);
    let mut diff = Diff::new();
    if !created.is_empty() {
        diff.insert("created", Change::new(Value::Null, json!(created)));
    }
    if !rotated.is_empty() {
        diff.insert("rotated", Change::new(json!(rotated), Value::Null));
    }

    if diff.is_empty() {
        Ok(Outcome::unchanged(
            name,
            format!("instance {} snapshots already in desired state", args.instance),
        ))
    } else if ctx.dry_run {
        Ok(Outcome::pending(
            name,
            diff,
            format!("instance {} snapshots would be managed", args.instance),
        ))
    } else {
        Ok(Outcome::changed(
            name,
            diff,
            format!("instance {} snapshots managed", args.instance),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSnapshotsRotated {
    pub instance: String,
    pub pattern: String,
    pub keep: usize,
}

pub async fn instance_snapshots_rotated(
    ctx: &Context,
    args: InstanceSnapshotsRotated,
) -> Result<Outcome> {
    let policy = RotationPolicy::new(&args.pattern, args.keep)?;
    require_parent(&ctx.client.instances(), &args.instance).await?;
    let report = rotation::rotate(
        &ctx.client.instance_snapshots(&args.instance),
        &policy,
        ctx.dry_run,
    )
    .await?;
    Ok(rotation_outcome(
        &args.instance,
        report,
        &format!("instance {} '{}'", args.instance, args.pattern),
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSnapshotPresent {
    pub name: String,
    pub pool: String,
    pub volume: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn volume_snapshot_present(
    ctx: &Context,
    args: VolumeSnapshotPresent,
) -> Result<Outcome> {
    require_parent(&ctx.client.volumes(&args.pool, &args.volume_type), &args.volume).await?;
    let options = SnapshotOptions {
        stateful: false,
        description: args.description,
        expires_at: args.expires_at,
    };
    let snapshots = ctx
        .client
        .volume_snapshots(&args.pool, &args.volume_type, &args.volume);
    let owner = format!("{}/{}", args.pool, args.volume);
    ensure_snapshot(ctx, &snapshots, &owner, &args.name, options).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSnapshotName {
    pub name: String,
    pub pool: String,
    pub volume: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
}

pub async fn volume_snapshot_absent(ctx: &Context, args: VolumeSnapshotName) -> Result<Outcome> {
    let volumes = ctx.client.volumes(&args.pool, &args.volume_type);
    if fetch(&volumes, &args.volume).await?.is_none() {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("storage volume {}/{} does not exist", args.pool, args.volume),
        ));
    }
    let snapshots = ctx
        .client
        .volume_snapshots(&args.pool, &args.volume_type, &args.volume);
    remove(ctx, &snapshots, &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSnapshotsRotated {
    pub pool: String,
    pub volume: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    pub pattern: String,
    pub keep: usize,
}

pub async fn volume_snapshots_rotated(
    ctx: &Context,
    args: VolumeSnapshotsRotated,
) -> Result<Outcome> {
    let policy = RotationPolicy::new(&args.pattern, args.keep)?;
    require_parent(&ctx.client.volumes(&args.pool, &args.volume_type), &args.volume).await?;
    let snapshots = ctx
        .client
        .volume_snapshots(&args.pool, &args.volume_type, &args.volume);
    let report = rotation::rotate(&snapshots, &policy, ctx.dry_run).await?;
    Ok(rotation_outcome(
        &args.volume,
        report,
        &format!("storage volume {}/{} '{}'", args.pool, args.volume, args.pattern),
    ))
}
