//! Image import, alias management and export

use super::Collection;
use crate::client::{Completion, encode_segment};
use crate::error::{ClientError, Result};
use crate::merge::ConfigMap;
use crate::model::{Image, ImageAlias};
use crate::wait::WaitPolicy;
use bytes::Bytes;
use http::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::path::PathBuf;

const PROTOCOLS: &[&str] = &["simplestreams", "incus", "lxd", "direct"];
const SOURCE_TYPES: &[&str] = &["container", "virtual-machine", "instance", "image"];

fn default_protocol() -> String {
    "simplestreams".to_string()
}

/// Image pulled from a remote image server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteImage {
    pub server: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub image_type: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub auto_update: bool,
    /// Local aliases created once the image is in place
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub properties: ConfigMap,
    #[serde(default)]
    pub compression_algorithm: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl RemoteImage {
    pub fn by_alias(server: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            alias: Some(alias.into()),
            fingerprint: None,
            protocol: default_protocol(),
            image_type: None,
            public: false,
            auto_update: false,
            aliases: Vec::new(),
            properties: ConfigMap::new(),
            compression_algorithm: None,
            expires_at: None,
        }
    }

    /// Checks done before any request is sent
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(ClientError::Validation(
                "an image server is required".to_string(),
            ));
        }
        match (&self.alias, &self.fingerprint) {
            (None, None) => {
                return Err(ClientError::Validation(
                    "either an alias or a fingerprint must be given".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ClientError::Validation(
                    "only one of alias or fingerprint may be given".to_string(),
                ));
            }
            _ => {}
        }
        if !PROTOCOLS.contains(&self.protocol.as_str()) {
            return Err(ClientError::Validation(format!(
                "invalid protocol '{}', expected one of {}",
                self.protocol,
                PROTOCOLS.join(", ")
            )));
        }
        if let Some(image_type) = &self.image_type
            && !SOURCE_TYPES.contains(&image_type.as_str())
        {
            return Err(ClientError::Validation(format!(
                "invalid image type '{}', expected one of {}",
                image_type,
                SOURCE_TYPES.join(", ")
            )));
        }
        Ok(())
    }

    fn request_body(&self) -> Value {
        let mut source = Map::new();
        source.insert("type".to_string(), json!("image"));
        source.insert("mode".to_string(), json!("pull"));
        source.insert("server".to_string(), json!(self.server));
        source.insert("protocol".to_string(), json!(self.protocol));
        if let Some(alias) = &self.alias {
            source.insert("alias".to_string(), json!(alias));
        }
        if let Some(fingerprint) = &self.fingerprint {
            source.insert("fingerprint".to_string(), json!(fingerprint));
        }
        if let Some(image_type) = &self.image_type {
            source.insert("image_type".to_string(), json!(image_type));
        }

        let mut body = json!({
            "source": source,
            "public": self.public,
            "auto_update": self.auto_update,
        });
        if !self.properties.is_empty() {
            body["properties"] = json!(self.properties);
        }
        if let Some(algorithm) = &self.compression_algorithm {
            body["compression_algorithm"] = json!(algorithm);
        }
        if let Some(expires_at) = &self.expires_at {
            body["expires_at"] = json!(expires_at);
        }
        body
    }
}

/// Image uploaded from a local file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileImport {
    pub path: PathBuf,
    pub public: bool,
    pub aliases: Vec<String>,
    pub properties: ConfigMap,
}

fn fingerprint_of(completion: &Completion, what: &str) -> Result<String> {
    let metadata = completion.metadata();
    // some servers nest the job result one level deeper
    let metadata = metadata.get("metadata").unwrap_or(metadata);
    metadata
        .get("fingerprint")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ClientError::Decode(format!("{} returned no fingerprint", what)))
}

impl Collection<'_, Image> {
    /// Pull an image from a remote server and return its fingerprint
    pub async fn create_from_remote(&self, image: &RemoteImage) -> Result<String> {
        image.validate()?;
        let what = format!(
            "import of {}:{}",
            image.server,
            image
                .alias
                .as_deref()
                .or(image.fingerprint.as_deref())
                .unwrap_or_default()
        );
        tracing::info!("starting {}", what);

        let completion = self
            .client()
            .sync_request_with(
                Method::POST,
                self.path(),
                Some(image.request_body()),
                &[],
                WaitPolicy::image_transfer(),
            )
            .await?;
        let fingerprint = fingerprint_of(&completion, &what)?;
        self.add_aliases(&fingerprint, &image.aliases).await;
        Ok(fingerprint)
    }

    /// Upload a local image file and return its fingerprint
    pub async fn create_from_file(&self, import: &FileImport) -> Result<String> {
        let data = tokio::fs::read(&import.path).await?;
        let mut headers = vec![
            (
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            ),
            (
                "X-Incus-public".to_string(),
                if import.public { "1" } else { "0" }.to_string(),
            ),
        ];
        if !import.properties.is_empty() {
            let encoded: Vec<String> = import
                .properties
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            headers.push(("X-Incus-properties".to_string(), encoded.join("&")));
        }

        let what = format!("upload of {}", import.path.display());
        tracing::info!("starting {} ({} bytes)", what, data.len());
        let completion = self
            .client()
            .upload(
                self.path(),
                Bytes::from(data),
                headers,
                WaitPolicy::image_transfer(),
            )
            .await?;
        let fingerprint = fingerprint_of(&completion, &what)?;
        self.add_aliases(&fingerprint, &import.aliases).await;
        Ok(fingerprint)
    }

    /// Best effort: a failed alias is logged and the import still counts
    async fn add_aliases(&self, fingerprint: &str, aliases: &[String]) {
        let alias_api = self.client().image_aliases();
        for alias in aliases {
            let body = json!({ "name": alias, "target": fingerprint });
            if let Err(e) = alias_api.create(body).await {
                tracing::warn!("failed to add alias {} to {}: {}", alias, fingerprint, e);
            }
        }
    }

    /// Aliases currently pointing at `fingerprint`
    pub async fn aliases_of(&self, fingerprint: &str) -> Result<Vec<String>> {
        let aliases: Vec<ImageAlias> = self.client().image_aliases().list().await?;
        Ok(aliases
            .into_iter()
            .filter(|alias| alias.target == fingerprint)
            .map(|alias| alias.name)
            .collect())
    }

    /// Fingerprint an alias resolves to, if the alias exists
    pub async fn find_by_alias(&self, alias: &str) -> Result<Option<String>> {
        Ok(self
            .client()
            .image_aliases()
            .get(alias)
            .await?
            .map(|alias| alias.target))
    }

    /// Replace top-level fields and, when `aliases` is given, make the
    /// alias set of the image exactly that list.
    ///
    /// Aliases are reconciled through the alias collection: stale ones are
    /// deleted (failures only logged) and missing ones created (failures
    /// returned).
    pub async fn update_image(
        &self,
        fingerprint: &str,
        fields: &Map<String, Value>,
        aliases: Option<&[String]>,
    ) -> Result<()> {
        if !fields.is_empty() {
            let mut patch = crate::merge::Patch::new();
            for (key, value) in fields {
                patch = patch.field(key.clone(), value.clone());
            }
            self.update(fingerprint, &patch).await?;
        }

        let Some(desired) = aliases else {
            return Ok(());
        };
        let current: BTreeSet<String> = self.aliases_of(fingerprint).await?.into_iter().collect();
        let desired: BTreeSet<String> = desired.iter().cloned().collect();
        let alias_api = self.client().image_aliases();

        for stale in current.difference(&desired) {
            if let Err(e) = alias_api.delete(stale).await {
                tracing::warn!("failed to delete alias {}: {}", stale, e);
            }
        }
        for missing in desired.difference(&current) {
            alias_api
                .create(json!({ "name": missing, "target": fingerprint }))
                .await?;
        }
        Ok(())
    }

    /// Ask the server to refresh the image from its source
    pub async fn refresh(&self, fingerprint: &str) -> Result<Completion> {
        tracing::info!("refreshing image {}", fingerprint);
        self.client()
            .sync_request_with(
                Method::POST,
                &format!("{}/refresh", self.item_path(fingerprint)),
                None,
                &[],
                WaitPolicy::image_transfer(),
            )
            .await
    }

    /// Create a one-time secret for fetching a private image
    pub async fn secret(&self, fingerprint: &str) -> Result<String> {
        let completion = self
            .client()
            .sync_request(
                Method::POST,
                &format!("{}/secret", self.item_path(fingerprint)),
                None,
                &[],
            )
            .await?;
        completion
            .metadata()
            .get("secret")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::Decode(format!(
                    "no secret returned for image {}",
                    encode_segment(fingerprint)
                ))
            })
    }

    /// Raw image tarball
    pub async fn export(&self, fingerprint: &str) -> Result<Bytes> {
        self.client()
            .request_raw(
                Method::GET,
                &format!("{}/export", self.item_path(fingerprint)),
                &[],
            )
            .await
    }
}
