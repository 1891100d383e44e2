//! Images: lookup by fingerprint or alias, import, alias convergence

use crate::context::Context;
use crate::diff::{Change, Diff, config_delta, lenient_config, set_delta, value_delta};
use crate::error::{Annotate, ConvergeError, Result};
use crate::outcome::Outcome;
use incusflow_client::merge::merge_config;
use incusflow_client::{ConfigMap, FileImport, Image, RemoteImage};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;

fn default_protocol() -> String {
    "simplestreams".to_string()
}

/// Remote image server entry of [`ImageSource`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSource {
    pub server: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub image_type: Option<String>,
}

/// Where a missing image is imported from: a remote server or a local file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    Remote(RemoteSource),
    File(PathBuf),
}

impl ImageSource {
    fn describe(&self) -> Value {
        match self {
            ImageSource::Remote(remote) => json!({
                "server": remote.server,
                "protocol": remote.protocol,
                "alias": remote.alias,
                "fingerprint": remote.fingerprint,
            }),
            ImageSource::File(path) => json!(path.display().to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagePresent {
    /// Primary alias of the image
    pub name: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub source: Option<ImageSource>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub auto_update: Option<bool>,
    /// Extra aliases besides `name`
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, deserialize_with = "lenient_config")]
    pub properties: Option<ConfigMap>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub compression_algorithm: Option<String>,
}

impl ImagePresent {
    /// `name` followed by `aliases`, without duplicates
    fn desired_aliases(&self) -> Vec<String> {
        let mut aliases = vec![self.name.clone()];
        for alias in &self.aliases {
            if !aliases.contains(alias) {
                aliases.push(alias.clone());
            }
        }
        aliases
    }

    /// Fingerprint, then `name`, then each alias, then the source alias
    async fn locate(&self, ctx: &Context) -> Result<Option<Image>> {
        let images = ctx.client.images();
        if let Some(fingerprint) = &self.fingerprint
            && let Some(image) = images
                .get(fingerprint)
                .await
                .annotate("get", &format!("image {}", fingerprint))?
        {
            return Ok(Some(image));
        }

        let mut candidates = self.desired_aliases();
        if let Some(ImageSource::Remote(RemoteSource {
            alias: Some(alias), ..
        })) = &self.source
        {
            candidates.push(alias.clone());
        }
        for alias in candidates {
            let target = images
                .find_by_alias(&alias)
                .await
                .annotate("get", &format!("image alias {}", alias))?;
            if let Some(fingerprint) = target {
                let image = images
                    .get(&fingerprint)
                    .await
                    .annotate("get", &format!("image {}", fingerprint))?;
                if image.is_some() {
                    return Ok(image);
                }
            }
        }
        Ok(None)
    }

    fn import_payload(&self, source: &ImageSource) -> Value {
        let mut body = Map::new();
        body.insert("source".to_string(), source.describe());
        body.insert("aliases".to_string(), json!(self.desired_aliases()));
        body.insert("public".to_string(), json!(self.public.unwrap_or(false)));
        if let Some(auto_update) = self.auto_update {
            body.insert("auto_update".to_string(), json!(auto_update));
        }
        if let Some(properties) = &self.properties {
            body.insert("properties".to_string(), json!(properties));
        }
        Value::Object(body)
    }

    async fn import(&self, ctx: &Context, source: &ImageSource) -> Result<Outcome> {
        let diff = Diff::creation(&self.import_payload(source));
        if ctx.dry_run {
            return Ok(Outcome::pending(
                &self.name,
                diff,
                format!("image {} would be imported", self.name),
            ));
        }

        let images = ctx.client.images();
        let label = format!("image {}", self.name);
        let fingerprint = match source {
            ImageSource::Remote(remote) => {
                let image = RemoteImage {
                    server: remote.server.clone(),
                    alias: remote.alias.clone(),
                    fingerprint: remote.fingerprint.clone(),
                    protocol: remote.protocol.clone(),
                    image_type: remote.image_type.clone(),
                    public: self.public.unwrap_or(false),
                    auto_update: self.auto_update.unwrap_or(false),
                    aliases: self.desired_aliases(),
                    properties: self.properties.clone().unwrap_or_default(),
                    compression_algorithm: self.compression_algorithm.clone(),
                    expires_at: self.expires_at.clone(),
                };
                images
                    .create_from_remote(&image)
                    .await
                    .annotate("import", &label)?
            }
            ImageSource::File(path) => {
                let import = FileImport {
                    path: path.clone(),
                    public: self.public.unwrap_or(false),
                    aliases: self.desired_aliases(),
                    properties: self.properties.clone().unwrap_or_default(),
                };
                images
                    .create_from_file(&import)
                    .await
                    .annotate("upload", &label)?
            }
        };
        Ok(Outcome::changed(
            &self.name,
            diff,
            format!("image {} imported as {}", self.name, fingerprint),
        )
        .with_realized(fingerprint))
    }

    async fn converge(&self, ctx: &Context, current: Image) -> Result<Outcome> {
        let mut diff = Diff::new();
        let mut fields = Map::new();

        let mut scalar = |field: &str, current: Value, desired: Option<Value>| {
            if let Some(desired) = desired
                && let Some(change) = value_delta(current, desired.clone())
            {
                diff.insert(field, change);
                fields.insert(field.to_string(), desired);
            }
        };
        scalar("public", json!(current.public), self.public.map(Value::Bool));
        scalar(
            "auto_update",
            json!(current.auto_update),
            self.auto_update.map(Value::Bool),
        );
        scalar(
            "expires_at",
            json!(current.expires_at),
            self.expires_at.as_ref().map(|v| json!(v)),
        );
        scalar(
            "compression_algorithm",
            json!(current.compression_algorithm),
            self.compression_algorithm.as_ref().map(|v| json!(v)),
        );

        if let Some(properties) = &self.properties {
            let delta = config_delta(&current.properties, properties);
            if !delta.is_empty() {
                let mut merged = current.properties.clone();
                merge_config(&mut merged, properties);
                fields.insert("properties".to_string(), json!(merged));
                diff.nested("properties", delta);
            }
        }

        let mut current_aliases: Vec<String> =
            current.aliases.iter().map(|a| a.name.clone()).collect();
        current_aliases.sort();
        let mut desired_aliases = self.desired_aliases();
        desired_aliases.sort();
        let alias_change = set_delta(&current_aliases, &desired_aliases);
        if let Some(change) = &alias_change {
            diff.insert("aliases", change.clone());
        }

        let label = format!("image {}", self.name);
        if diff.is_empty() {
            return Ok(Outcome::unchanged(
                &self.name,
                format!("{} already in desired state", label),
            )
            .with_realized(current.fingerprint));
        }
        if ctx.dry_run {
            return Ok(Outcome::pending(
                &self.name,
                diff,
                format!("{} would be updated", label),
            )
            .with_realized(current.fingerprint));
        }

        let aliases = alias_change.as_ref().map(|_| desired_aliases.as_slice());
        ctx.client
            .images()
            .update_image(&current.fingerprint, &fields, aliases)
            .await
            .annotate("update", &label)?;
        Ok(Outcome::changed(&self.name, diff, format!("{} updated", label))
            .with_realized(current.fingerprint))
    }
}

/// Image exists locally with the given aliases and attributes
///
/// A missing image is imported from `source`; with no source it is a
/// precondition failure, in a dry run as well.
pub async fn image_present(ctx: &Context, args: ImagePresent) -> Result<Outcome> {
    if let Some(current) = args.locate(ctx).await? {
        return args.converge(ctx, current).await;
    }
    match &args.source {
        Some(source) => args.import(ctx, source).await,
        None => Err(ConvergeError::Precondition(format!(
            "image {} not found and no source given",
            args.name
        ))),
    }
}

/// Same as [`image_present`]; the name reads better for pulled images
pub async fn image_installed(ctx: &Context, args: ImagePresent) -> Result<Outcome> {
    image_present(ctx, args).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageAbsent {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Image does not exist; looked up by alias first, then by fingerprint
pub async fn image_absent(ctx: &Context, args: ImageAbsent) -> Result<Outcome> {
    let name = match (&args.alias, &args.fingerprint) {
        (Some(alias), _) => alias.clone(),
        (None, Some(fingerprint)) => fingerprint.clone(),
        (None, None) => {
            return Err(ConvergeError::Validation(
                "image_absent needs an alias or a fingerprint".to_string(),
            ));
        }
    };
    let images = ctx.client.images();

    let mut fingerprint = None;
    if let Some(alias) = &args.alias {
        fingerprint = images
            .find_by_alias(alias)
            .await
            .annotate("get", &format!("image alias {}", alias))?;
    }
    if fingerprint.is_none()
        && let Some(candidate) = &args.fingerprint
        && images
            .get(candidate)
            .await
            .annotate("get", &format!("image {}", candidate))?
            .is_some()
    {
        fingerprint = Some(candidate.clone());
    }

    let Some(fingerprint) = fingerprint else {
        return Ok(Outcome::unchanged(
            name.as_str(),
            format!("image {} already absent", name),
        ));
    };

    let mut diff = Diff::new();
    diff.insert("image", Change::new(fingerprint.as_str(), Value::Null));
    if ctx.dry_run {
        return Ok(Outcome::pending(
            name.as_str(),
            diff,
            format!("image {} would be deleted", name),
        ));
    }
    images
        .delete(&fingerprint)
        .await
        .annotate("delete", &format!("image {}", fingerprint))?;
    Ok(Outcome::changed(
        name.as_str(),
        diff,
        format!("image {} deleted", name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Applied;
    use crate::states::test_support::{args, context};
    use incusflow_client::testing::FakeIncus;

    const FP: &str = "aaaa000000000000000000000000000000000000000000000000000000000001";

    fn seed(fake: &FakeIncus) {
        fake.seed(
            &format!("/images/{}", FP),
            json!({
                "fingerprint": FP,
                "public": false,
                "auto_update": false,
                "properties": {"os": "debian"}
            }),
        );
        fake.seed(
            "/images/aliases/debian",
            json!({"name": "debian", "target": FP}),
        );
        fake.seed(
            "/images/aliases/old",
            json!({"name": "old", "target": FP}),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_by_name_alias_converges_attributes() {
        let fake = FakeIncus::new();
        seed(&fake);
        let spec = json!({
            "name": "debian",
            "aliases": ["debian/12"],
            "public": true,
            "properties": {"release": 12}
        });

        let planned = image_present(&context(&fake, true), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(planned.applied, Applied::Pending);
        assert_eq!(planned.realized.as_deref(), Some(FP));
        assert_eq!(fake.mutation_count(), 0);

        let outcome = image_present(&context(&fake, false), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(outcome.diff, planned.diff);
        assert_eq!(
            outcome.diff.fields().collect::<Vec<_>>(),
            vec!["aliases", "properties", "public"]
        );

        let image = fake.object(&format!("/images/{}", FP)).unwrap();
        assert_eq!(image["public"], true);
        assert_eq!(image["properties"], json!({"os": "debian", "release": "12"}));
        assert!(fake.object("/images/aliases/old").is_none());
        assert!(fake.object("/images/aliases/debian%2F12").is_some());

        let again = image_present(&context(&fake, false), args(spec))
            .await
            .unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_imported_from_remote_when_missing() {
        let fake = FakeIncus::new();
        let spec = json!({
            "name": "alpine",
            "source": {"server": "https://images.linuxcontainers.org", "alias": "alpine/3.19"}
        });

        let outcome = image_present(&context(&fake, false), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        let fingerprint = outcome.realized.clone().unwrap();
        assert_eq!(
            fake.object("/images/aliases/alpine").unwrap()["target"],
            json!(fingerprint)
        );
        let body = fake.last_body("POST", "/images").unwrap();
        assert_eq!(body["source"]["mode"], "pull");

        let again = image_installed(&context(&fake, false), args(spec))
            .await
            .unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
        assert_eq!(again.realized, Some(fingerprint));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_falls_back_to_source_alias() {
        let fake = FakeIncus::new();
        seed(&fake);
        let spec = json!({
            "name": "base",
            "source": {"server": "https://example.org", "alias": "debian"}
        });
        let outcome = image_present(&context(&fake, true), args(spec))
            .await
            .unwrap();
        assert_eq!(outcome.realized.as_deref(), Some(FP));
        assert_eq!(fake.count("POST", "/images"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_and_no_source() {
        let fake = FakeIncus::new();
        let err = image_present(&context(&fake, true), args(json!({"name": "nothing"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Precondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_by_alias() {
        let fake = FakeIncus::new();
        seed(&fake);

        let outcome = image_absent(&context(&fake, false), args(json!({"alias": "debian"})))
            .await
            .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert!(fake.object(&format!("/images/{}", FP)).is_none());

        let again = image_absent(&context(&fake, false), args(json!({"fingerprint": FP})))
            .await
            .unwrap();
        assert_eq!(again.applied, Applied::Unchanged);

        let err = image_absent(&context(&fake, false), args(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Validation(_)));
    }
}
