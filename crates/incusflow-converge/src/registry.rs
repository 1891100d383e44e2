//! Named state functions and state files
//!
//! A state file lists calls to run in order:
//!
//! ```yaml
//! states:
//!   - id: web
//!     function: instance_present
//!     args:
//!       name: web
//!       source: {alias: debian/12, server: "https://images.linuxcontainers.org"}
//!   - id: web-running
//!     function: instance_running
//!     args: {name: web}
//! ```

use crate::context::Context;
use crate::error::{ConvergeError, Result};
use crate::outcome::{Outcome, Report};
use crate::states::{cluster, image, instance, network, profile, settings, snapshot, storage};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;

/// Routes function names to state functions
pub struct Registry;

impl Registry {
    pub const FUNCTIONS: &'static [&'static str] = &[
        "instance_present",
        "instance_absent",
        "instance_running",
        "instance_stopped",
        "instance_snapshot_present",
        "instance_snapshot_absent",
        "instance_snapshot_restored",
        "instance_snapshots_managed",
        "instance_snapshots_rotated",
        "image_present",
        "image_installed",
        "image_absent",
        "storage_pool_present",
        "storage_pool_absent",
        "storage_pool_config",
        "volume_present",
        "volume_absent",
        "volume_config",
        "volume_attached",
        "volume_detached",
        "volume_snapshot_present",
        "volume_snapshot_absent",
        "volume_snapshots_rotated",
        "network_present",
        "network_absent",
        "network_acl_present",
        "network_acl_absent",
        "network_forward_present",
        "network_forward_absent",
        "network_peer_present",
        "network_peer_absent",
        "network_zone_present",
        "network_zone_absent",
        "network_zone_record_present",
        "network_zone_record_absent",
        "profile_present",
        "profile_absent",
        "profile_config",
        "settings_present",
        "settings_config",
        "settings_absent",
        "settings_managed",
        "cluster_member_present",
        "cluster_member_absent",
    ];

    pub fn is_registered(function: &str) -> bool {
        Self::FUNCTIONS.contains(&function)
    }

    /// Run state function `function` with `args`
    pub async fn dispatch(ctx: &Context, function: &str, args: Value) -> Result<Outcome> {
        match function {
            "instance_present" => call(ctx, function, args, instance::present).await,
            "instance_absent" => call(ctx, function, args, instance::absent).await,
            "instance_running" => call(ctx, function, args, instance::running).await,
            "instance_stopped" => call(ctx, function, args, instance::stopped).await,
            "instance_snapshot_present" => {
                call(ctx, function, args, snapshot::instance_snapshot_present).await
            }
            "instance_snapshot_absent" => {
                call(ctx, function, args, snapshot::instance_snapshot_absent).await
            }
            "instance_snapshot_restored" => {
                call(ctx, function, args, snapshot::instance_snapshot_restored).await
            }
            "instance_snapshots_managed" => {
                call(ctx, function, args, snapshot::instance_snapshots_managed).await
            }
            "instance_snapshots_rotated" => {
                call(ctx, function, args, snapshot::instance_snapshots_rotated).await
            }
            "image_present" => call(ctx, function, args, image::image_present).await,
            "image_installed" => call(ctx, function, args, image::image_installed).await,
            "image_absent" => call(ctx, function, args, image::image_absent).await,
            "storage_pool_present" => call(ctx, function, args, storage::storage_pool_present).await,
            "storage_pool_absent" => call(ctx, function, args, storage::storage_pool_absent).await,
            "storage_pool_config" => call(ctx, function, args, storage::storage_pool_config).await,
            "volume_present" => call(ctx, function, args, storage::volume_present).await,
            "volume_absent" => call(ctx, function, args, storage::volume_absent).await,
            "volume_config" => call(ctx, function, args, storage::volume_config).await,
            "volume_attached" => call(ctx, function, args, storage::volume_attached).await,
            "volume_detached" => call(ctx, function, args, storage::volume_detached).await,
            "volume_snapshot_present" => {
                call(ctx, function, args, snapshot::volume_snapshot_present).await
            }
            "volume_snapshot_absent" => {
                call(ctx, function, args, snapshot::volume_snapshot_absent).await
            }
            "volume_snapshots_rotated" => {
                call(ctx, function, args, snapshot::volume_snapshots_rotated).await
            }
            "network_present" => call(ctx, function, args, network::network_present).await,
            "network_absent" => call(ctx, function, args, network::network_absent).await,
            "network_acl_present" => call(ctx, function, args, network::network_acl_present).await,
            "network_acl_absent" => call(ctx, function, args, network::network_acl_absent).await,
            "network_forward_present" => {
                call(ctx, function, args, network::network_forward_present).await
            }
            "network_forward_absent" => {
                call(ctx, function, args, network::network_forward_absent).await
            }
            "network_peer_present" => call(ctx, function, args, network::network_peer_present).await,
            "network_peer_absent" => call(ctx, function, args, network::network_peer_absent).await,
            "network_zone_present" => call(ctx, function, args, network::network_zone_present).await,
            "network_zone_absent" => call(ctx, function, args, network::network_zone_absent).await,
            "network_zone_record_present" => {
                call(ctx, function, args, network::network_zone_record_present).await
            }
            "network_zone_record_absent" => {
                call(ctx, function, args, network::network_zone_record_absent).await
            }
            "profile_present" => call(ctx, function, args, profile::profile_present).await,
            "profile_absent" => call(ctx, function, args, profile::profile_absent).await,
            "profile_config" => call(ctx, function, args, profile::profile_config).await,
            "settings_present" => call(ctx, function, args, settings::settings_present).await,
            "settings_config" => call(ctx, function, args, settings::settings_config).await,
            "settings_absent" => call(ctx, function, args, settings::settings_absent).await,
            "settings_managed" => call(ctx, function, args, settings::settings_managed).await,
            "cluster_member_present" => {
                call(ctx, function, args, cluster::cluster_member_present).await
            }
            "cluster_member_absent" => {
                call(ctx, function, args, cluster::cluster_member_absent).await
            }
            other => Err(ConvergeError::Validation(format!(
                "unknown state function `{}`",
                other
            ))),
        }
    }

    /// Run every state in order; a failed state does not stop the run
    pub async fn run(ctx: &Context, file: &StateFile) -> Report {
        let mut report = Report::new();
        for entry in &file.states {
            tracing::info!("[{}] {}", entry.id, entry.function);
            let result = Self::dispatch(ctx, &entry.function, entry.args.clone()).await;
            match &result {
                Ok(outcome) => tracing::debug!("[{}] {}: {}", entry.id, outcome.applied, outcome.comment),
                Err(e) => tracing::error!("[{}] {} failed: {}", entry.id, entry.function, e),
            }
            report.push(entry.id.clone(), entry.function.clone(), result);
        }
        report
    }
}

async fn call<'a, A, F, Fut>(ctx: &'a Context, function: &str, args: Value, state: F) -> Result<Outcome>
where
    A: DeserializeOwned,
    F: FnOnce(&'a Context, A) -> Fut,
    Fut: Future<Output = Result<Outcome>>,
{
    // `args:` left empty in YAML
    let args = if args.is_null() { json!({}) } else { args };
    let args: A = serde_json::from_value(args).map_err(|e| {
        ConvergeError::Validation(format!("invalid arguments for {}: {}", function, e))
    })?;
    state(ctx, args).await
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateEntry {
    pub id: String,
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

/// Ordered list of states
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateFile {
    #[serde(default)]
    pub states: Vec<StateEntry>,
}

impl StateFile {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: StateFile = serde_yaml::from_str(content)
            .map_err(|e| ConvergeError::StateFile(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConvergeError::StateFile(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            ConvergeError::StateFile(message) => {
                ConvergeError::StateFile(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Ids are unique and every function is registered
    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.states {
            if entry.id.trim().is_empty() {
                return Err(ConvergeError::StateFile(format!(
                    "state calling {} has an empty id",
                    entry.function
                )));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConvergeError::StateFile(format!("duplicate state id `{}`", entry.id)));
            }
            if !Registry::is_registered(&entry.function) {
                return Err(ConvergeError::StateFile(format!(
                    "state `{}` calls unknown function `{}`",
                    entry.id, entry.function
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Applied;
    use incusflow_client::testing::FakeIncus;

    #[test]
    fn test_function_names_are_unique() {
        let unique: BTreeSet<_> = Registry::FUNCTIONS.iter().collect();
        assert_eq!(unique.len(), Registry::FUNCTIONS.len());
        assert!(Registry::is_registered("volume_attached"));
        assert!(!Registry::is_registered("volume_mounted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_registered_name_dispatches() {
        let fake = FakeIncus::new();
        let ctx = Context::new(fake.client()).with_dry_run(true);
        for function in Registry::FUNCTIONS {
            // a string is never valid arguments, so each call stops at parsing
            let err = Registry::dispatch(&ctx, function, json!("nope"))
                .await
                .unwrap_err();
            assert!(
                err.to_string().contains(&format!("invalid arguments for {}", function)),
                "{}: {}",
                function,
                err
            );
        }
        assert_eq!(fake.requests().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_function() {
        let fake = FakeIncus::new();
        let ctx = Context::new(fake.client());
        let err = Registry::dispatch(&ctx, "instance_exploded", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_argument_rejected() {
        let fake = FakeIncus::new();
        let ctx = Context::new(fake.client());
        let err = Registry::dispatch(&ctx, "profile_absent", json!({"name": "web", "nmae": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nmae"));
    }

    #[test]
    fn test_state_file_parsing() {
        let file = StateFile::from_yaml_str(
            r#"
states:
  - id: bridge
    function: network_present
    args:
      name: br0
      config:
        ipv4.address: 10.0.0.1/24
  - id: settings
    function: settings_absent
"#,
        )
        .unwrap();
        assert_eq!(file.len(), 2);
        assert_eq!(file.states[0].args["config"]["ipv4.address"], "10.0.0.1/24");
        assert_eq!(file.states[1].args, Value::Null);
    }

    #[test]
    fn test_state_file_rejects_duplicates_and_unknown_functions() {
        let duplicate = StateFile::from_yaml_str(
            "states:\n  - {id: a, function: network_absent, args: {name: x}}\n  - {id: a, function: network_absent, args: {name: y}}\n",
        )
        .unwrap_err();
        assert!(duplicate.to_string().contains("duplicate state id `a`"));

        let unknown =
            StateFile::from_yaml_str("states:\n  - {id: a, function: network_gone}\n").unwrap_err();
        assert!(unknown.to_string().contains("network_gone"));
    }

    #[test]
    fn test_state_file_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let err = StateFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_after_failure() {
        let fake = FakeIncus::new();
        let ctx = Context::new(fake.client());
        let file = StateFile::from_yaml_str(
            r#"
states:
  - id: attach
    function: volume_attached
    args: {name: data, pool: default, instance: ghost, path: /data}
  - id: profile
    function: profile_present
    args: {name: web, config: {limits.cpu: 2}}
"#,
        )
        .unwrap();

        let report = Registry::run(&ctx, &file).await;
        assert!(!report.is_success());
        assert_eq!(report.states.len(), 2);
        assert_eq!(report.states[0].result(), Some(false));
        let profile = report.states[1].result.as_ref().unwrap();
        assert_eq!(profile.applied, Applied::Changed);
        let summary = report.summary();
        assert_eq!((summary.changed, summary.failed), (1, 1));
    }
}
