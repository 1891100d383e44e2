//! Instance state changes, exec and readiness waits

use super::Collection;
use crate::client::encode_segment;
use crate::error::{ClientError, Result};
use crate::model::{Instance, Snapshot};
use crate::wait::{WaitPolicy, poll_until};
use http::Method;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::Instant;

/// File cloud-init writes once the first boot is complete
const CLOUD_INIT_MARKER: &str = "/var/lib/cloud/instance/boot-finished";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

impl StateAction {
    /// Status the instance reports once the action is done
    pub fn target_status(&self) -> &'static str {
        match self {
            StateAction::Start | StateAction::Restart | StateAction::Unfreeze => "Running",
            StateAction::Stop => "Stopped",
            StateAction::Freeze => "Frozen",
        }
    }
}

impl std::fmt::Display for StateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateAction::Start => write!(f, "start"),
            StateAction::Stop => write!(f, "stop"),
            StateAction::Restart => write!(f, "restart"),
            StateAction::Freeze => write!(f, "freeze"),
            StateAction::Unfreeze => write!(f, "unfreeze"),
        }
    }
}

/// Body of `PUT /instances/<name>/state`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub action: StateAction,
    pub force: bool,
    pub stateful: bool,
    /// Seconds the server waits for a clean shutdown
    pub timeout: i64,
}

impl StateChange {
    pub fn new(action: StateAction) -> Self {
        Self {
            action,
            force: false,
            stateful: false,
            timeout: 30,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Result of a command run inside an instance
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub return_code: i64,
    pub output: Value,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Options for publishing a snapshot as an image
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub public: bool,
    pub aliases: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

impl<'c> Collection<'c, Instance> {
    pub fn snapshots(&self, instance: &str) -> Collection<'c, Snapshot> {
        self.client().instance_snapshots(instance)
    }

    pub async fn change_state(&self, name: &str, change: &StateChange) -> Result<()> {
        tracing::info!("{} instance {}", change.action, name);
        self.client()
            .sync_request(
                Method::PUT,
                &format!("{}/state", self.item_path(name)),
                Some(serde_json::to_value(change)?),
                &[],
            )
            .await?;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.change_state(name, &StateChange::new(StateAction::Start))
            .await
    }

    pub async fn stop(&self, name: &str, force: bool) -> Result<()> {
        self.change_state(name, &StateChange::new(StateAction::Stop).force(force))
            .await
    }

    pub async fn restart(&self, name: &str, force: bool) -> Result<()> {
        self.change_state(name, &StateChange::new(StateAction::Restart).force(force))
            .await
    }

    /// Runtime state (`GET /instances/<name>/state`)
    pub async fn state(&self, name: &str) -> Result<Value> {
        let response = self
            .client()
            .request(Method::GET, &format!("{}/state", self.item_path(name)), None, &[])
            .await?;
        Ok(response.metadata)
    }

    /// Run `command` inside the instance without attaching to it
    pub async fn exec(&self, name: &str, command: &[&str]) -> Result<ExecResult> {
        let body = json!({
            "command": command,
            "environment": {},
            "wait-for-websocket": false,
            "interactive": false,
            "record-output": false,
        });
        let completion = self
            .client()
            .sync_request(
                Method::POST,
                &format!("{}/exec", self.item_path(name)),
                Some(body),
                &[],
            )
            .await?;

        let metadata = completion.into_metadata();
        let return_code = metadata
            .get("return")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ClientError::Decode(format!("exec on {} returned no exit code", name))
            })?;
        Ok(ExecResult {
            return_code,
            output: metadata.get("output").cloned().unwrap_or(Value::Null),
        })
    }

    /// Wait until the guest agent answers an exec of `/bin/true`
    pub async fn wait_ready(&self, name: &str, policy: WaitPolicy) -> Result<Duration> {
        let started = Instant::now();
        let what = format!("instance {} to become ready", name);

        poll_until(policy, self.client().cancellation(), &what, move || async move {
            match self.exec(name, &["/bin/true"]).await {
                Ok(_) => Ok(ControlFlow::Break(())),
                Err(e) => {
                    tracing::debug!("instance {} not ready yet: {}", name, e);
                    Ok(ControlFlow::Continue(()))
                }
            }
        })
        .await?;

        let elapsed = started.elapsed();
        tracing::info!("instance {} is ready after {:.1}s", name, elapsed.as_secs_f64());
        Ok(elapsed)
    }

    /// Wait until cloud-init has written its boot-finished marker
    pub async fn wait_cloud_init(&self, name: &str, policy: WaitPolicy) -> Result<Duration> {
        let started = Instant::now();
        let what = format!("cloud-init on {}", name);

        poll_until(policy, self.client().cancellation(), &what, move || async move {
            match self.exec(name, &["test", "-f", CLOUD_INIT_MARKER]).await {
                Ok(result) if result.success() => Ok(ControlFlow::Break(())),
                Ok(_) => Ok(ControlFlow::Continue(())),
                Err(e) => {
                    tracing::debug!("cloud-init check on {} failed: {}", name, e);
                    Ok(ControlFlow::Continue(()))
                }
            }
        })
        .await?;

        Ok(started.elapsed())
    }

    /// Publish `instance/snapshot` as a new image and return its fingerprint
    pub async fn publish_snapshot(
        &self,
        instance: &str,
        snapshot: &str,
        options: &PublishOptions,
    ) -> Result<String> {
        let aliases: Vec<Value> = options
            .aliases
            .iter()
            .map(|alias| json!({ "name": alias }))
            .collect();
        let body = json!({
            "source": {
                "type": "snapshot",
                "name": format!("{}/{}", instance, snapshot),
            },
            "public": options.public,
            "aliases": aliases,
            "properties": options.properties,
        });

        tracing::info!("publishing snapshot {}/{}", instance, snapshot);
        let completion = self
            .client()
            .sync_request_with(Method::POST, "/images", Some(body), &[], WaitPolicy::image_transfer())
            .await?;
        completion
            .metadata()
            .get("fingerprint")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::Decode(format!(
                    "publishing {}/{} returned no fingerprint",
                    encode_segment(instance),
                    snapshot
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIncus;
    use serde_json::json;

    fn seed_web(fake: &FakeIncus, status: &str) {
        fake.seed(
            "/instances/web",
            json!({"name": "web", "type": "container", "status": status, "config": {}}),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes() {
        let fake = FakeIncus::new();
        seed_web(&fake, "Stopped");
        let client = fake.client();
        let instances = client.instances();

        instances.start("web").await.unwrap();
        assert!(instances.get("web").await.unwrap().unwrap().is_running());

        instances.stop("web", true).await.unwrap();
        let body = fake.last_body("PUT", "/instances/web/state").unwrap();
        assert_eq!(body["action"], "stop");
        assert_eq!(body["force"], true);
        assert_eq!(body["timeout"], 30);
        assert_eq!(instances.get("web").await.unwrap().unwrap().status, "Stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_returns_exit_code() {
        let fake = FakeIncus::new();
        seed_web(&fake, "Running");
        fake.set_exec_returns("web", vec![3]);
        let client = fake.client();

        let result = client.instances().exec("web", &["false"]).await.unwrap();
        assert_eq!(result.return_code, 3);
        assert!(!result.success());

        let body = fake.last_body("POST", "/instances/web/exec").unwrap();
        assert_eq!(body["command"], json!(["false"]));
        assert_eq!(body["wait-for-websocket"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_retries_until_agent_answers() {
        let fake = FakeIncus::new();
        seed_web(&fake, "Running");
        // the first two execs fail at the operation level
        fake.fail_exec("web", 2, "VM agent isn't currently running");
        let client = fake.client();

        client
            .instances()
            .wait_ready("web", WaitPolicy::agent_ready())
            .await
            .unwrap();
        assert_eq!(fake.count("POST", "/instances/web/exec"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out() {
        let fake = FakeIncus::new();
        seed_web(&fake, "Running");
        fake.fail_exec("web", u32::MAX, "VM agent isn't currently running");
        let client = fake.client();

        let policy = WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(2));
        let err = client
            .instances()
            .wait_ready("web", policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(fake.count("POST", "/instances/web/exec"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cloud_init_checks_marker() {
        let fake = FakeIncus::new();
        seed_web(&fake, "Running");
        fake.set_exec_returns("web", vec![1, 1, 0]);
        let client = fake.client();

        client
            .instances()
            .wait_cloud_init("web", WaitPolicy::cloud_init())
            .await
            .unwrap();

        let body = fake.last_body("POST", "/instances/web/exec").unwrap();
        assert_eq!(
            body["command"],
            json!(["test", "-f", "/var/lib/cloud/instance/boot-finished"])
        );
        assert_eq!(fake.count("POST", "/instances/web/exec"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_snapshot() {
        let fake = FakeIncus::new();
        seed_web(&fake, "Running");
        let client = fake.client();
        client
            .instance_snapshots("web")
            .take("base", &Default::default())
            .await
            .unwrap();

        let options = PublishOptions {
            aliases: vec!["web-base".to_string()],
            ..Default::default()
        };
        let fingerprint = client
            .instances()
            .publish_snapshot("web", "base", &options)
            .await
            .unwrap();

        let body = fake.last_body("POST", "/images").unwrap();
        assert_eq!(body["source"]["type"], "snapshot");
        assert_eq!(body["source"]["name"], "web/base");
        assert!(client.images().get(&fingerprint).await.unwrap().is_some());
        assert_eq!(
            client.images().find_by_alias("web-base").await.unwrap(),
            Some(fingerprint)
        );
    }

    #[test]
    fn test_target_status() {
        assert_eq!(StateAction::Start.target_status(), "Running");
        assert_eq!(StateAction::Stop.target_status(), "Stopped");
        assert_eq!(StateAction::Restart.to_string(), "restart");
    }
}
