//! Networks and the objects hanging off them: ACLs, forwards, peers,
//! DNS zones and zone records
//!
//! Rule, port and entry lists are compared and replaced as a whole,
//! after scalar fields are coerced to the form the control plane stores.

use super::{create, fetch, label, put, remove, update};
use crate::context::Context;
use crate::diff::{Changeset, lenient_config, lenient_entries, lenient_records};
use crate::error::{ConvergeError, Result};
use crate::outcome::Outcome;
use incusflow_client::{ConfigMap, Network, NetworkZone};
use serde::Deserialize;
use serde_json::{Map, Value, json};

fn default_network_type() -> String {
    "bridge".to_string()
}

/// Creation body shared by every object here
fn base_payload(
    identity: (&str, &str),
    config: Option<&ConfigMap>,
    description: Option<&String>,
) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(identity.0.to_string(), json!(identity.1));
    put(&mut body, "config", config);
    put(&mut body, "description", description);
    body
}

async fn require_network(ctx: &Context, network: &str) -> Result<()> {
    if fetch(&ctx.client.networks(), network).await?.is_none() {
        return Err(ConvergeError::Precondition(format!(
            "{} does not exist",
            label::<Network>(network)
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkPresent {
    pub name: String,
    #[serde(rename = "type", default = "default_network_type")]
    pub network_type: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn network_present(ctx: &Context, args: NetworkPresent) -> Result<Outcome> {
    let networks = ctx.client.networks();
    let Some(current) = fetch(&networks, &args.name).await? else {
        let mut body = base_payload(("name", args.name.as_str()), args.config.as_ref(), args.description.as_ref());
        body.insert("type".to_string(), json!(args.network_type));
        return create(ctx, &networks, &args.name, Value::Object(body)).await;
    };
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &networks, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkName {
    pub name: String,
}

pub async fn network_absent(ctx: &Context, args: NetworkName) -> Result<Outcome> {
    remove(ctx, &ctx.client.networks(), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclPresent {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub egress: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub ingress: Option<Vec<Value>>,
}

pub async fn network_acl_present(ctx: &Context, args: AclPresent) -> Result<Outcome> {
    let acls = ctx.client.network_acls();
    let Some(current) = fetch(&acls, &args.name).await? else {
        let mut body = base_payload(("name", args.name.as_str()), args.config.as_ref(), args.description.as_ref());
        put(&mut body, "egress", args.egress.as_ref());
        put(&mut body, "ingress", args.ingress.as_ref());
        return create(ctx, &acls, &args.name, Value::Object(body)).await;
    };
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref())
        .field("egress", json!(current.egress), args.egress.map(Value::Array))
        .field("ingress", json!(current.ingress), args.ingress.map(Value::Array));
    update(ctx, &acls, &args.name, changes).await
}

pub async fn network_acl_absent(ctx: &Context, args: NetworkName) -> Result<Outcome> {
    remove(ctx, &ctx.client.network_acls(), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardPresent {
    pub network: String,
    pub listen_address: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub ports: Option<Vec<Value>>,
}

/// Forward identified by its listen address on `network`
pub async fn network_forward_present(ctx: &Context, args: ForwardPresent) -> Result<Outcome> {
    require_network(ctx, &args.network).await?;
    let forwards = ctx.client.network_forwards(&args.network);
    let Some(current) = fetch(&forwards, &args.listen_address).await? else {
        let mut body = base_payload(
            ("listen_address", args.listen_address.as_str()),
            args.config.as_ref(),
            args.description.as_ref(),
        );
        put(&mut body, "ports", args.ports.as_ref());
        return create(ctx, &forwards, &args.listen_address, Value::Object(body)).await;
    };
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref())
        .field("ports", json!(current.ports), args.ports.map(Value::Array));
    update(ctx, &forwards, &args.listen_address, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardName {
    pub network: String,
    pub listen_address: String,
}

pub async fn network_forward_absent(ctx: &Context, args: ForwardName) -> Result<Outcome> {
    if fetch(&ctx.client.networks(), &args.network).await?.is_none() {
        return Ok(Outcome::unchanged(
            &args.listen_address,
            format!("{} does not exist", label::<Network>(&args.network)),
        ));
    }
    remove(ctx, &ctx.client.network_forwards(&args.network), &args.listen_address).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerPresent {
    pub network: String,
    #[serde(alias = "peer_name")]
    pub name: String,
    pub target_network: String,
    #[serde(default)]
    pub target_project: Option<String>,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Peering between two networks; the target cannot change after creation
pub async fn network_peer_present(ctx: &Context, args: PeerPresent) -> Result<Outcome> {
    require_network(ctx, &args.network).await?;
    let peers = ctx.client.network_peers(&args.network);
    let Some(current) = fetch(&peers, &args.name).await? else {
        let mut body = base_payload(("name", args.name.as_str()), args.config.as_ref(), args.description.as_ref());
        body.insert("target_network".to_string(), json!(args.target_network));
        put(&mut body, "target_project", args.target_project.as_ref());
        return create(ctx, &peers, &args.name, Value::Object(body)).await;
    };
    if current.target_network != args.target_network {
        return Err(ConvergeError::Precondition(format!(
            "network peer {} targets {}, not {}; delete it first to retarget",
            args.name, current.target_network, args.target_network
        )));
    }
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &peers, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerName {
    pub network: String,
    #[serde(alias = "peer_name")]
    pub name: String,
}

pub async fn network_peer_absent(ctx: &Context, args: PeerName) -> Result<Outcome> {
    if fetch(&ctx.client.networks(), &args.network).await?.is_none() {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("{} does not exist", label::<Network>(&args.network)),
        ));
    }
    remove(ctx, &ctx.client.network_peers(&args.network), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZonePresent {
    #[serde(alias = "zone")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn network_zone_present(ctx: &Context, args: ZonePresent) -> Result<Outcome> {
    let zones = ctx.client.network_zones();
    let Some(current) = fetch(&zones, &args.name).await? else {
        let body = base_payload(("name", args.name.as_str()), args.config.as_ref(), args.description.as_ref());
        return create(ctx, &zones, &args.name, Value::Object(body)).await;
    };
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref());
    update(ctx, &zones, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneName {
    #[serde(alias = "zone")]
    pub name: String,
}

pub async fn network_zone_absent(ctx: &Context, args: ZoneName) -> Result<Outcome> {
    remove(ctx, &ctx.client.network_zones(), &args.name).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordPresent {
    pub zone: String,
    #[serde(alias = "record_name")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_config")]
    pub config: Option<ConfigMap>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_records")]
    pub entries: Option<Vec<Value>>,
}

pub async fn network_zone_record_present(ctx: &Context, args: RecordPresent) -> Result<Outcome> {
    if fetch(&ctx.client.network_zones(), &args.zone).await?.is_none() {
        return Err(ConvergeError::Precondition(format!(
            "{} does not exist",
            label::<NetworkZone>(&args.zone)
        )));
    }
    let records = ctx.client.zone_records(&args.zone);
    let Some(current) = fetch(&records, &args.name).await? else {
        let mut body = base_payload(("name", args.name.as_str()), args.config.as_ref(), args.description.as_ref());
        put(&mut body, "entries", args.entries.as_ref());
        return create(ctx, &records, &args.name, Value::Object(body)).await;
    };
    let mut changes = Changeset::new();
    changes
        .config(&current.config, args.config.as_ref())
        .description(&current.description, args.description.as_deref())
        .field("entries", json!(current.entries), args.entries.map(Value::Array));
    update(ctx, &records, &args.name, changes).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordName {
    pub zone: String,
    #[serde(alias = "record_name")]
    pub name: String,
}

pub async fn network_zone_record_absent(ctx: &Context, args: RecordName) -> Result<Outcome> {
    if fetch(&ctx.client.network_zones(), &args.zone).await?.is_none() {
        return Ok(Outcome::unchanged(
            &args.name,
            format!("{} does not exist", label::<NetworkZone>(&args.zone)),
        ));
    }
    remove(ctx, &ctx.client.zone_records(&args.zone), &args.name).await
}
