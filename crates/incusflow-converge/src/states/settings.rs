//! Server-wide configuration (`/1.0` `config`)
//!
//! `settings_present` and `settings_config` merge, `settings_absent`
//! removes keys, `settings_managed` makes the given map the whole
//! configuration.

use crate::context::Context;
use crate::diff::{Change, Diff, config_delta, config_replace_delta};
use crate::error::{Annotate, ConvergeError, Result};
use crate::outcome::Outcome;
use incusflow_client::merge::stringify;
use incusflow_client::{ConfigMap, ServerSettings};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

const SERVER: &str = "server";

/// Outcome name, defaulting to `server`
fn outcome_name(name: &Option<String>) -> String {
    name.clone().unwrap_or_else(|| SERVER.to_string())
}

async fn current(ctx: &Context) -> Result<ServerSettings> {
    ctx.client
        .server_settings()
        .get()
        .await
        .annotate("get", "server settings")
}

fn config_diff(delta: BTreeMap<String, Change>) -> Diff {
    let mut diff = Diff::new();
    diff.nested("config", delta);
    diff
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPresent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_required")]
    pub config: ConfigMap,
}

fn lenient_required<'de, D>(deserializer: D) -> std::result::Result<ConfigMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw.iter().map(|(k, v)| (k.clone(), stringify(v))).collect())
}

/// The given keys hold the given values; other keys are kept
pub async fn settings_present(ctx: &Context, args: SettingsPresent) -> Result<Outcome> {
    let name = outcome_name(&args.name);
    let settings = current(ctx).await?;
    let delta = config_delta(&settings.config, &args.config);
    if delta.is_empty() {
        return Ok(Outcome::unchanged(name, "server settings already in desired state"));
    }
    let changed: ConfigMap = delta
        .keys()
        .filter_map(|key| args.config.get(key).map(|value| (key.clone(), value.clone())))
        .collect();
    let diff = config_diff(delta);
    if ctx.dry_run {
        return Ok(Outcome::pending(name, diff, "server settings would be updated"));
    }
    ctx.client
        .server_settings()
        .update(&changed)
        .await
        .annotate("update", "server settings")?;
    Ok(Outcome::changed(name, diff, "server settings updated"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub key: String,
    pub value: Value,
}

/// One key holds one value
pub async fn settings_config(ctx: &Context, args: SettingsConfig) -> Result<Outcome> {
    if args.key.trim().is_empty() {
        return Err(ConvergeError::Validation("setting key must not be empty".to_string()));
    }
    let name = outcome_name(&args.name);
    let desired = stringify(&args.value);
    let settings = current(ctx).await?;
    let existing = settings.config.get(&args.key);
    if existing == Some(&desired) {
        return Ok(Outcome::unchanged(
            name,
            format!("server setting {} already set", args.key),
        ));
    }
    let mut delta = BTreeMap::new();
    delta.insert(
        args.key.clone(),
        Change::new(existing.map_or(Value::Null, |v| json!(v)), desired),
    );
    let diff = config_diff(delta);
    if ctx.dry_run {
        return Ok(Outcome::pending(
            name,
            diff,
            format!("server setting {} would be set", args.key),
        ));
    }
    ctx.client
        .server_settings()
        .set(&args.key, &args.value)
        .await
        .annotate("set", &format!("server setting {}", args.key))?;
    Ok(Outcome::changed(name, diff, format!("server setting {} set", args.key)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsAbsent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

impl SettingsAbsent {
    fn requested(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.key.iter().chain(self.keys.iter()).cloned().collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// The keys are not set; keys that are already unset are skipped
pub async fn settings_absent(ctx: &Context, args: SettingsAbsent) -> Result<Outcome> {
    let requested = args.requested();
    if requested.is_empty() {
        return Err(ConvergeError::Validation(
            "settings_absent needs `key` or `keys`".to_string(),
        ));
    }
    let name = outcome_name(&args.name);
    let settings = current(ctx).await?;
    let present: Vec<String> = requested
        .into_iter()
        .filter(|key| settings.config.contains_key(key))
        .collect();
    if present.is_empty() {
        return Ok(Outcome::unchanged(name, "server settings already absent"));
    }
    let delta: BTreeMap<String, Change> = present
        .iter()
        .filter_map(|key| {
            settings
                .config
                .get(key)
                .map(|value| (key.clone(), Change::new(value.as_str(), Value::Null)))
        })
        .collect();
    let diff = config_diff(delta);
    if ctx.dry_run {
        return Ok(Outcome::pending(
            name,
            diff,
            format!("server setting(s) {} would be removed", present.join(", ")),
        ));
    }
    ctx.client
        .server_settings()
        .unset_many(&present)
        .await
        .annotate("unset", "server settings")?;
    Ok(Outcome::changed(
        name,
        diff,
        format!("server setting(s) {} removed", present.join(", ")),
    ))
}

/// The given map is the complete server configuration
pub async fn settings_managed(ctx: &Context, args: SettingsPresent) -> Result<Outcome> {
    let name = outcome_name(&args.name);
    let settings = current(ctx).await?;
    let delta = config_replace_delta(&settings.config, &args.config);
    if delta.is_empty() {
        return Ok(Outcome::unchanged(name, "server settings already in desired state"));
    }
    let diff = config_diff(delta);
    if ctx.dry_run {
        return Ok(Outcome::pending(name, diff, "server settings would be replaced"));
    }
    ctx.client
        .server_settings()
        .replace(args.config)
        .await
        .annotate("replace", "server settings")?;
    Ok(Outcome::changed(name, diff, "server settings replaced"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Applied;
    use crate::states::test_support::{args, context};
    use incusflow_client::testing::FakeIncus;

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

    fn stored(fake: &FakeIncus) -> Value {
        fake.object("").unwrap()["config"].clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_merges() {
        let fake = seeded();
        let ctx = context(&fake, false);
        let outcome = settings_present(
            &ctx,
            args(json!({"config": {"images.auto_update_interval": 12, "core.https_address": ":8443"}})),
        )
        .await
        .unwrap();
        assert_eq!(outcome.name, "server");
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(
            outcome.diff.to_value(),
            json!({"config": {"images.auto_update_interval": {"old": "6", "new": "12"}}})
        );
        assert_eq!(
            stored(&fake),
            json!({"core.https_address": ":8443", "images.auto_update_interval": "12"})
        );

        let again = settings_present(
            &ctx,
            args(json!({"config": {"images.auto_update_interval": "12"}})),
        )
        .await
        .unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_sets_one_key() {
        let fake = seeded();
        let ctx = context(&fake, false);
        let spec = json!({"name": "trust", "key": "core.trust_password", "value": "secret"});

        let planned = settings_config(&context(&fake, true), args(spec.clone()))
            .await
            .unwrap();
        assert_eq!(planned.applied, Applied::Pending);
        assert_eq!(planned.name, "trust");

        let applied = settings_config(&ctx, args(spec.clone())).await.unwrap();
        assert_eq!(applied.diff, planned.diff);
        assert_eq!(stored(&fake)["core.trust_password"], "secret");

        let again = settings_config(&ctx, args(spec)).await.unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_skips_missing_keys() {
        let fake = seeded();
        let ctx = context(&fake, false);
        let outcome = settings_absent(
            &ctx,
            args(json!({"key": "core.https_address", "keys": ["never.set"]})),
        )
        .await
        .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(stored(&fake), json!({"images.auto_update_interval": "6"}));

        let again = settings_absent(&ctx, args(json!({"keys": ["core.https_address"]})))
            .await
            .unwrap();
        assert_eq!(again.applied, Applied::Unchanged);

        let err = settings_absent(&ctx, args(json!({}))).await.unwrap_err();
        assert!(matches!(err, ConvergeError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_managed_replaces() {
        let fake = seeded();
        let ctx = context(&fake, false);
        let outcome = settings_managed(
            &ctx,
            args(json!({"config": {"core.https_address": ":9443"}})),
        )
        .await
        .unwrap();
        assert_eq!(outcome.applied, Applied::Changed);
        assert_eq!(
            outcome.diff.get_nested("config", "images.auto_update_interval"),
            Some(&Change::new("6", Value::Null))
        );
        assert_eq!(stored(&fake), json!({"core.https_address": ":9443"}));

        let again = settings_managed(
            &ctx,
            args(json!({"config": {"core.https_address": ":9443"}})),
        )
        .await
        .unwrap();
        assert_eq!(again.applied, Applied::Unchanged);
    }
}
