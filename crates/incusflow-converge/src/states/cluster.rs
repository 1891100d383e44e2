//! Cluster membership
//!
//! The join password goes to the control plane only; it never appears in a
//! diff or in debug output.

use super::{fetch, label};
use crate::context::Context;
use crate::diff::{Change, Diff};
use crate::error::{Annotate, Result};
use crate::outcome::Outcome;
use incusflow_client::ClusterMember;
use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterMemberPresent {
    pub name: String,
    /// `host:port` the new member listens on
    pub address: String,
    #[serde(default)]
    pub cluster_password: Option<String>,
}

impl std::fmt::Debug for ClusterMemberPresent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMemberPresent")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("cluster_password", &self.cluster_password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Member exists; an existing member is never modified
pub async fn cluster_member_present(ctx: &Context, args: ClusterMemberPresent) -> Result<Outcome> {
    let member_label = label::<ClusterMember>(&args.name);
    if let Some(member) = fetch(&ctx.client.cluster_members(), &args.name).await? {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("{} already present ({})", member_label, member.status),
        ));
    }

    // the join password stays out of the diff
    let mut diff = Diff::new();
    diff.insert("server_name", Change::new(Value::Null, args.name.as_str()));
    diff.insert("server_address", Change::new(Value::Null, args.address.as_str()));
    if ctx.dry_run {
        return Ok(Outcome::pending(
            &args.name,
            diff,
            format!("{} would be added", member_label),
        ));
    }
    ctx.client
        .cluster()
        .add_member(&args.name, &args.address, args.cluster_password.as_deref())
        .await
        .annotate("add", &member_label)?;
    Ok(Outcome::changed(&args.name, diff, format!("{} added", member_label)).with_realized(&args.name))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterMemberAbsent {
    pub name: String,
    /// Remove even when the member is unreachable
    #[serde(default)]
    pub force: bool,
}

pub async fn cluster_member_absent(ctx: &Context, args: ClusterMemberAbsent) -> Result<Outcome> {
    let member_label = label::<ClusterMember>(&args.name);
    if fetch(&ctx.client.cluster_members(), &args.name).await?.is_none() {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("{} already absent", member_label),
        ));
    }
    let diff = Diff::removal("cluster_member", &args.name);
    if ctx.dry_run {
        return Ok(Outcome::pending(
            &args.name,
            diff,
            format!("{} would be removed", member_label),
        ));
    }
    ctx.client
        .cluster()
        .remove_member(&args.name, args.force)
        .await
        .annotate("remove", &member_label)?;
    Ok(Outcome::changed(&args.name, diff, format!("{} removed", member_label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Applied;
    use crate::states::test_support::{args, context};
    use incusflow_client::testing::FakeIncus;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_member_added_once() {
        let fake = FakeIncus::new();
        let ctx = context(&fake, false);
        let spec = json!({"name": "node2", "address": "10.0.0.2:8443", "cluster_password": "s3cret"});

        let added = cluster_member_present(&ctx, args(spec.clone())).await.unwrap();
        assert_eq!(added.applied, Applied::Changed);
        assert!(!added.diff.to_value().to_string().contains("s3cret"));
        let body = fake.last_body("POST", "/cluster/members").unwrap();
        assert_eq!(body["cluster_password"], "s3cret");

        let again = cluster_member_present(&ctx, args(spec)).await.unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
        assert_eq!(fake.count("POST", "/cluster/members"), 1);
    }

    #[test]
    fn test_debug_hides_password() {
        let present: ClusterMemberPresent =
            args(json!({"name": "node2", "address": "10.0.0.2:8443", "cluster_password": "s3cret"}));
        assert!(!format!("{:?}", present).contains("s3cret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_removed_with_force() {
        let fake = FakeIncus::new();
        fake.seed(
            "/cluster/members/node2",
            json!({"server_name": "node2", "status": "Offline"}),
        );
        let ctx = context(&fake, false);

        let planned = cluster_member_absent(&context(&fake, true), args(json!({"name": "node2"})))
            .await
            .unwrap();
        assert_eq!(planned.applied, Applied::Pending);
        assert!(fake.object("/cluster/members/node2").is_some());

        let removed = cluster_member_absent(&ctx, args(json!({"name": "node2", "force": true})))
            .await
            .unwrap();
        assert_eq!(removed.applied, Applied::Changed);
        assert!(fake.object("/cluster/members/node2").is_none());
        let request = fake
            .requests()
            .into_iter()
            .rfind(|r| r.method == http::Method::DELETE)
            .unwrap();
        assert!(request.path.ends_with("?force=1"));
    }
}
