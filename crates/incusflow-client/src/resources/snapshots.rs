//! Snapshots of instances and custom volumes
//!
//! Both kinds share the same shape: a `snapshots` collection under the
//! parent object, and restore expressed as a PUT of `{"restore": name}`
//! on the parent itself.

use super::Collection;
use crate::client::Completion;
use crate::error::Result;
use crate::merge::Patch;
use crate::model::Snapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use http::Method;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotOptions {
    /// Include runtime state (instances only)
    pub stateful: bool,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Collection<'_, Snapshot> {
    /// Path of the object the snapshots belong to
    pub fn parent_path(&self) -> &str {
        self.path()
            .strip_suffix("/snapshots")
            .unwrap_or(self.path())
    }

    pub async fn take(&self, name: &str, options: &SnapshotOptions) -> Result<Completion> {
        let mut body = Map::new();
        body.insert("name".to_string(), json!(name));
        if let Some(description) = &options.description {
            body.insert("description".to_string(), json!(description));
        }
        if options.stateful {
            body.insert("stateful".to_string(), json!(true));
        }
        if let Some(expires_at) = &options.expires_at {
            body.insert("expires_at".to_string(), json!(timestamp(expires_at)));
        }
        self.create(Value::Object(body)).await
    }

    /// Roll the parent back to snapshot `name`
    pub async fn restore(&self, name: &str, stateful: bool) -> Result<Completion> {
        let mut body = json!({ "restore": name });
        if stateful {
            body["stateful"] = json!(true);
        }
        tracing::info!("restoring {} to snapshot {}", self.parent_path(), name);
        self.client()
            .sync_request(Method::PUT, self.parent_path(), Some(body), &[])
            .await
    }

    /// Change description and/or expiry of an existing snapshot
    pub async fn update_snapshot(
        &self,
        name: &str,
        description: Option<&str>,
        expires_at: Option<&DateTime<Utc>>,
    ) -> Result<Completion> {
        let mut patch = Patch::new();
        if let Some(description) = description {
            patch = patch.description(description);
        }
        if let Some(expires_at) = expires_at {
            patch = patch.field("expires_at", json!(timestamp(expires_at)));
        }
        self.update(name, &patch).await
    }
}
