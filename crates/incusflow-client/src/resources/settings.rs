//! Global server configuration (`/1.0`)

use crate::client::{Completion, IncusClient};
use crate::error::{ClientError, Result};
use crate::merge::{ConfigMap, merge_config, stringify};
use crate::model::ServerSettings;
use http::Method;
use serde_json::{Value, json};

/// Accessor for the server's own `config` map
#[derive(Debug, Clone, Copy)]
pub struct ServerSettingsApi<'c> {
    client: &'c IncusClient,
}

impl<'c> ServerSettingsApi<'c> {
    pub(crate) fn new(client: &'c IncusClient) -> Self {
        Self { client }
    }

    pub async fn get(&self) -> Result<ServerSettings> {
        let response = self.client.request(Method::GET, "", None, &[]).await?;
        Ok(serde_json::from_value(response.metadata)?)
    }

    /// Merge `config` into the current settings; other keys are kept
    pub async fn update(&self, config: &ConfigMap) -> Result<Completion> {
        let mut current = self.get().await?.config;
        merge_config(&mut current, config);
        tracing::info!("updating {} server setting(s)", config.len());
        self.put(current).await
    }

    pub async fn set(&self, key: &str, value: &Value) -> Result<Completion> {
        if key.trim().is_empty() {
            return Err(ClientError::Validation(
                "setting key must not be empty".to_string(),
            ));
        }
        let mut config = ConfigMap::new();
        config.insert(key.to_string(), stringify(value));
        self.update(&config).await
    }

    /// Remove one key; a key that is not set is an error
    pub async fn unset(&self, key: &str) -> Result<Completion> {
        self.unset_many(&[key.to_string()]).await
    }

    /// Remove several keys in a single write; every key must be set
    pub async fn unset_many(&self, keys: &[String]) -> Result<Completion> {
        let mut current = self.get().await?.config;
        for key in keys {
            if current.remove(key).is_none() {
                return Err(ClientError::NotFound {
                    kind: "server setting",
                    name: key.clone(),
                });
            }
        }
        tracing::info!("unsetting server setting(s) {}", keys.join(", "));
        self.put(current).await
    }

    /// Make `config` the complete server configuration
    pub async fn replace(&self, config: ConfigMap) -> Result<Completion> {
        tracing::warn!("replacing the whole server configuration ({} keys)", config.len());
        self.put(config).await
    }

    async fn put(&self, config: ConfigMap) -> Result<Completion> {
        self.client
            .sync_request(Method::PUT, "", Some(json!({ "config": config })), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIncus;

    fn seeded() -> FakeIncus {
        let fake = FakeIncus::new();
        fake.seed(
            "",
            json!({
                "config": {"core.https_address": ":8443", "images.auto_update_interval": "6"},
                "api_version": "1.0"
            }),
        );
        fake
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_merges() {
        let fake = seeded();
        let client = fake.client();
        let settings = client.server_settings();

        settings
            .update(&[("images.auto_update_interval".to_string(), "12".to_string())].into())
            .await
            .unwrap();
        let config = settings.get().await.unwrap().config;
        assert_eq!(config["images.auto_update_interval"], "12");
        assert_eq!(config["core.https_address"], ":8443");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_stringifies() {
        let fake = seeded();
        let client = fake.client();
        let settings = client.server_settings();

        settings
            .set("images.remote_cache_expiry", &json!(10))
            .await
            .unwrap();
        assert_eq!(
            settings.get().await.unwrap().config["images.remote_cache_expiry"],
            "10"
        );
        assert!(settings.set(" ", &json!("x")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_missing_key_fails_without_writing() {
        let fake = seeded();
        let client = fake.client();
        let settings = client.server_settings();

        let err = settings.unset("core.trust_password").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.mutation_count(), 0);

        settings.unset("core.https_address").await.unwrap();
        assert!(
            !settings
                .get()
                .await
                .unwrap()
                .config
                .contains_key("core.https_address")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_drops_other_keys() {
        let fake = seeded();
        let client = fake.client();
        let settings = client.server_settings();

        settings
            .replace([("core.https_address".to_string(), "[::]:8443".to_string())].into())
            .await
            .unwrap();
        let config = settings.get().await.unwrap().config;
        assert_eq!(config.len(), 1);
        assert_eq!(config["core.https_address"], "[::]:8443");
    }
}
