//! Cluster membership

use crate::client::{Completion, IncusClient};
use crate::error::Result;
use http::Method;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy)]
pub struct ClusterApi<'c> {
    client: &'c IncusClient,
}

impl<'c> ClusterApi<'c> {
    pub(crate) fn new(client: &'c IncusClient) -> Self {
        Self { client }
    }

    /// `GET /cluster`
    pub async fn info(&self) -> Result<Value> {
        let response = self
            .client
            .request(Method::GET, "/cluster", None, &[])
            .await?;
        Ok(response.metadata)
    }

    pub async fn add_member(
        &self,
        name: &str,
        address: &str,
        password: Option<&str>,
    ) -> Result<Completion> {
        let mut body = json!({
            "server_name": name,
            "server_address": address,
        });
        if let Some(password) = password {
            body["cluster_password"] = json!(password);
        }
        tracing::info!("adding cluster member {} at {}", name, address);
        self.client
            .sync_request(Method::POST, "/cluster/members", Some(body), &[])
            .await
    }

    pub async fn remove_member(&self, name: &str, force: bool) -> Result<Completion> {
        let query: &[(&str, &str)] = if force { &[("force", "1")] } else { &[] };
        self.client.cluster_members().delete_with(name, query).await
    }
}
