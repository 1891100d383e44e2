//! Instances: existence, configuration and run state

use super::{create, fetch, label, put, update};
use crate::context::Context;
use crate::diff::{Change, Changeset, Diff, lenient_config};
use crate::error::{Annotate, ConvergeError, Result};
use crate::outcome::Outcome;
use incusflow_client::{
    ConfigMap, DeviceChange, DeviceChanges, DeviceMap, Instance, StateAction, StateChange,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

const INSTANCE_TYPES: &[&str] = &["container", "virtual-machine"];

fn default_instance_type() -> String {
    "container".to_string()
}

fn default_source_type() -> String {
    "image".to_string()
}

/// Where a new instance comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSource {
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Remote image server; the local image store when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl InstanceSource {
    fn validate(&self) -> Result<()> {
        if self.source_type == "image" && self.alias.is_none() && self.fingerprint.is_none() {
            return Err(ConvergeError::Validation(
                "an image source needs an alias or a fingerprint".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstancePresent {
    pub name: String,
    #[serde(rename = "type", default = "default_instance_type")]
    pub instance_type: String,
    /// Required only when the instance has to be created
    #[serde(default)]
    pub source: Option<InstanceSource>,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub devices: Option<DeviceChanges>,
    #[serde(default)]
    pub profiles: Option<Vec<String>>,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl InstancePresent {
    fn creation_payload(&self) -> Result<Value> {
        let source = self.source.as_ref().ok_or_else(|| {
            ConvergeError::Precondition(format!(
                "instance {} does not exist and no source was given",
                self.name
            ))
        })?;
        source.validate()?;

        let devices: Option<DeviceMap> = self.devices.as_ref().map(|devices| {
            devices
                .iter()
                .filter_map(|(name, change)| match change {
                    DeviceChange::Set(props) => Some((name.clone(), props.clone())),
                    DeviceChange::Remove => None,
                })
                .collect()
        });

        let mut body = Map::new();
        body.insert("name".to_string(), json!(self.name));
        body.insert("type".to_string(), json!(self.instance_type));
        body.insert("source".to_string(), serde_json::to_value(source)?);
        body.insert("ephemeral".to_string(), json!(self.ephemeral));
        put(&mut body, "config", self.config.as_ref());
        put(&mut body, "devices", devices);
        put(&mut body, "profiles", self.profiles.as_ref());
        put(&mut body, "description", self.description.as_ref());
        Ok(Value::Object(body))
    }
}

/// Instance exists with the given config, devices, profiles and description
pub async fn present(ctx: &Context, args: InstancePresent) -> Result<Outcome> {
    if !INSTANCE_TYPES.contains(&args.instance_type.as_str()) {
        return Err(ConvergeError::Validation(format!(
            "invalid instance type '{}', expected one of {}",
            args.instance_type,
            INSTANCE_TYPES.join(", ")
        )));
    }
    let instances = ctx.client.instances();
    let Some(current) = fetch(&instances, &args.name).await? else {
        let payload = args.creation_payload()?;
        return create(ctx, &instances, &args.name, payload).await;
    };

    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .devices(&current.devices, args.devices.as_ref())
        .set_field("profiles", &current.profiles, args.profiles.as_deref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &instances, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceAbsent {
    pub name: String,
    /// Stop a running instance before deleting it
    #[serde(default)]
    pub force: bool,
}

/// Instance does not exist
///
/// A running instance is stopped first only with `force`; otherwise the
/// control plane refuses the delete and that error is returned.
pub async fn absent(ctx: &Context, args: InstanceAbsent) -> Result<Outcome> {
    let instances = ctx.client.instances();
    let label = label::<Instance>(&args.name);
    let Some(current) = fetch(&instances, &args.name).await? else {
        return Ok(Outcome::unchanged(&args.name, format!("{} already absent", label)));
    };

    let diff = Diff::removal("instance", &args.name);
    if ctx.dry_run {
        return Ok(Outcome::pending(&args.name, diff, format!("{} would be deleted", label)));
    }
    if args.force && current.is_running() {
        instances
            .stop(&args.name, args.force)
            .await
            .annotate("stop", &label)?;
    }
    instances.delete(&args.name).await.annotate("delete", &label)?;
    Ok(Outcome::changed(&args.name, diff, format!("{} deleted", label)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceRunning {
    pub name: String,
}

/// Instance is running; a frozen instance is unfrozen
pub async fn running(ctx: &Context, args: InstanceRunning) -> Result<Outcome> {
    let current = require(ctx, &args.name).await?;
    let action = if current.status.eq_ignore_ascii_case("frozen") {
        StateAction::Unfreeze
    } else {
        StateAction::Start
    };
    transition(ctx, current, action, false).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceStopped {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

pub async fn stopped(ctx: &Context, args: InstanceStopped) -> Result<Outcome> {
    let current = require(ctx, &args.name).await?;
    transition(ctx, current, StateAction::Stop, args.force).await
}

async fn require(ctx: &Context, name: &str) -> Result<Instance> {
    fetch(&ctx.client.instances(), name)
        .await?
        .ok_or_else(|| ConvergeError::Precondition(format!("instance {} does not exist", name)))
}

/// Compare status strings and change state when they differ
///
/// The reported end status is the one the action targets; the instance
/// is not polled again afterwards.
async fn transition(
    ctx: &Context,
    current: Instance,
    action: StateAction,
    force: bool,
) -> Result<Outcome> {
    let target = action.target_status();
    let label = label::<Instance>(&current.name);
    if current.status.eq_ignore_ascii_case(target) {
        return Ok(Outcome::unchanged(
            &current.name,
            format!("{} already {}", label, target.to_lowercase()),
        ));
    }

    let mut diff = Diff::new();
    diff.insert("state", Change::new(current.status.as_str(), target));
    if ctx.dry_run {
        return Ok(Outcome::pending(
            &current.name,
            diff,
            format!("{} would be {}", label, target.to_lowercase()),
        ));
    }

    let instances = ctx.client.instances();
    let change = StateChange::new(action).force(force);
    instances
        .change_state(&current.name, &change)
        .await
        .annotate(&action.to_string(), &label)?;
    Ok(Outcome::changed(
        &current.name,
        diff,
        format!("{} {}", label, target.to_lowercase()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Applied;
    use crate::states::test_support::{args, context};
    use incusflow_client::testing::FakeIncus;

    fn web(fake: &FakeIncus, status: &str) {
        fake.seed(
            "/instances/web",
            json!({
                "name": "web",
                "type": "container",
                "status": status,
                "config": {"limits.cpu": "2"},
                "devices": {"root": {"type": "disk", "path": "/", "pool": "default"}},
                "profiles": ["default"],
                "description": ""
            }),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_unchanged() {
        let fake = FakeIncus::new();
        let spec = json!({
            "name": "web",
            "source": {"alias": "debian/12", "server": "https://images.linuxcontainers.org", "protocol": "simplestreams"},
            "config": {"limits.cpu": 2},
            "devices": {"eth1": "absent", "data": {"type": "disk", "path": "/data", "source": "/srv"}},
            "profiles": ["default"]
        });

        let ctx = context(&fake, false);
        let outcome = present(&ctx, args(spec.clone())).await.unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(outcome.realized.as_deref(), Some("web"));

        let body = fake.last_body("POST", "/instances").unwrap();
        assert_eq!(body["type"], "container");
        assert_eq!(body["source"]["type"], "image");
        assert_eq!(body["config"]["limits.cpu"], "2");
        assert_eq!(body["devices"], json!({"data": {"type": "disk", "path": "/data", "source": "/srv"}}));
        assert_eq!(body["ephemeral"], false);

        let second = present(&ctx, args(spec)).await.unwrap();
        assert_eq!(second.applied, Applied::Unchanged);
        assert!(second.diff.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_merges_config() {
        let fake = FakeIncus::new();
        web(&fake, "Running");
        let ctx = context(&fake, false);

        let outcome = present(
            &ctx,
            args(json!({"name": "web", "config": {"limits.memory": "4GB"}})),
        )
        .await
        .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(outcome.diff.len(), 1);
        assert_eq!(
            outcome.diff.get_nested("config", "limits.memory"),
            Some(&Change::new(Value::Null, "4GB"))
        );

        let stored = fake.object("/instances/web").unwrap();
        assert_eq!(
            stored["config"],
            json!({"limits.cpu": "2", "limits.memory": "4GB"})
        );
        assert_eq!(stored["devices"]["root"]["pool"], "default");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_matches_real_run() {
        let spec = json!({
            "name": "web",
            "config": {"limits.cpu": "4"},
            "devices": {"root": {"size": "20GiB"}},
            "profiles": ["default", "web"],
            "description": "web server"
        });

        let fake = FakeIncus::new();
        web(&fake, "Running");
        let planned = present(&context(&fake, true), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(planned.applied, Applied::Pending);
        assert_eq!(fake.mutation_count(), 0);

        let applied = present(&context(&fake, false), args(spec))
            .await
            .unwrap();
        assert_eq!(applied.applied, Applied::Changed);
        assert_eq!(planned.diff, applied.diff);
        assert_eq!(
            applied.diff.fields().collect::<Vec<_>>(),
            vec!["config", "description", "devices", "profiles"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_source_is_a_precondition_failure() {
        let fake = FakeIncus::new();
        let err = present(&context(&fake, true), args(json!({"name": "web"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Precondition(_)));

        let err = present(
            &context(&fake, true),
            args(json!({"name": "web", "type": "vm", "source": {"alias": "x"}})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConvergeError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_and_stopped() {
        let fake = FakeIncus::new();
        web(&fake, "Stopped");
        let ctx = context(&fake, false);

        let outcome = running(&ctx, args(json!({"name": "web"}))).await.unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(
            outcome.diff.get("state"),
            Some(&crate::diff::DiffEntry::Field(Change::new("Stopped", "Running")))
        );
        assert_eq!(fake.object("/instances/web").unwrap()["status"], "Running");

        let again = running(&ctx, args(json!({"name": "web"}))).await.unwrap();
        assert_eq!(again.applied, Applied::Unchanged);

        let stop = stopped(&ctx, args(json!({"name": "web", "force": true})))
            .await
            .unwrap();
        assert_eq!(stop.applied, Applied::Changed);
        let body = fake.last_body("PUT", "/instances/web/state").unwrap();
        assert_eq!(body["action"], "stop");
        assert_eq!(body["force"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_instance_is_unfrozen() {
        let fake = FakeIncus::new();
        web(&fake, "Frozen");
        running(&context(&fake, false), args(json!({"name": "web"})))
            .await
            .unwrap();
        let body = fake.last_body("PUT", "/instances/web/state").unwrap();
        assert_eq!(body["action"], "unfreeze");
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_of_missing_instance() {
        let fake = FakeIncus::new();
        for dry_run in [true, false] {
            let ctx = context(&fake, dry_run);
            let err = running(&ctx, args(json!({"name": "ghost"}))).await.unwrap_err();
            assert!(matches!(err, ConvergeError::Precondition(_)));
            let err = stopped(&ctx, args(json!({"name": "ghost"}))).await.unwrap_err();
            assert!(matches!(err, ConvergeError::Precondition(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_with_force_stops_running_instance() {
        let fake = FakeIncus::new();
        web(&fake, "Running");
        let spec = json!({"name": "web", "force": true});

        let planned = absent(&context(&fake, true), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(planned.applied, Applied::Pending);
        assert_eq!(fake.mutation_count(), 0);

        let outcome = absent(&context(&fake, false), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(fake.count("PUT", "/instances/web/state"), 1);
        let body = fake.last_body("PUT", "/instances/web/state").unwrap();
        assert_eq!(body["action"], "stop");
        assert_eq!(body["force"], true);
        assert!(fake.object("/instances/web").is_none());

        let again = absent(&context(&fake, false), args(spec)).await.unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_without_force_leaves_running_instance() {
        let fake = FakeIncus::new();
        web(&fake, "Running");

        let err = absent(&context(&fake, false), args(json!({"name": "web"})))
            .await
            .unwrap_err();
        match err {
            ConvergeError::Api { source, .. } => {
                assert_eq!(source.error_code(), Some(400));
                assert!(source.to_string().contains("Instance is running"));
            }
            other => panic!("Expected API error, got {:?}", other),
        }
        assert_eq!(fake.count("PUT", "/instances/web/state"), 0);
        assert_eq!(fake.object("/instances/web").unwrap()["status"], "Running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_deletes_stopped_instance_without_force() {
        let fake = FakeIncus::new();
        web(&fake, "Stopped");

        let outcome = absent(&context(&fake, false), args(json!({"name": "web"})))
            .await
            .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(fake.count("PUT", "/instances/web/state"), 0);
        assert!(fake.object("/instances/web").is_none());
    }
}
