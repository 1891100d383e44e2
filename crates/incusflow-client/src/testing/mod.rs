//! In-memory control planes for tests
//!
//! - [`ScriptedTransport`] replays canned responses in order.
//! - [`FakeIncus`] keeps objects in a map and answers the REST API the
//!   way the real server does: every mutation is deferred to an
//!   operation, items live under their collection path, and missing
//!   objects produce 404 error envelopes.
//!
//! Both record every request so tests can count polls and writes.

use crate::client::{ClientOptions, IncusClient, encode_segment};
use crate::error::{ClientError, Result};
use crate::transport::{Body, HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat};
use http::Method;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport that answers from a fixed script
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<(u16, Value)>>,
    repeat: Option<(u16, Value)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    /// Answer each request with the next entry; fail once exhausted
    pub fn new(script: Vec<(u16, Value)>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Answer every request with the same response
    pub fn repeating(status: u16, body: Value) -> Self {
        Self {
            repeat: Some((status, body)),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        lock(&self.requests).push(request);
        let next = lock(&self.script).pop_front().or_else(|| self.repeat.clone());
        match next {
            Some((status, body)) => Ok(HttpResponse {
                status,
                body: Bytes::from(serde_json::to_vec(&body)?),
            }),
            None => Err(ClientError::Transport("script exhausted".to_string())),
        }
    }

    fn endpoint(&self) -> String {
        "scripted".to_string()
    }
}

/// Injected failure for [`FakeIncus::fail_on`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Answer immediately with this HTTP status
    Status { status: u16, message: String },
    /// Accept the request and fail the resulting operation
    Operation(String),
}

enum Reply {
    Sync(Value),
    Async {
        result: std::result::Result<Value, String>,
        mutation: bool,
    },
    Error(u16, String),
    Raw(Bytes),
}

impl Reply {
    fn accepted() -> Self {
        Reply::Async {
            result: Ok(json!({})),
            mutation: true,
        }
    }

    fn not_found(path: &str) -> Self {
        Reply::Error(404, format!("{} not found", path))
    }
}

struct PendingOperation {
    polls_left: u32,
    result: std::result::Result<Value, String>,
}

struct ExecFailure {
    remaining: u32,
    message: String,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<String, Value>,
    requests: Vec<HttpRequest>,
    operations: BTreeMap<String, PendingOperation>,
    failures: Vec<(Method, String, Failure)>,
    exec_returns: BTreeMap<String, VecDeque<i64>>,
    exec_failures: BTreeMap<String, ExecFailure>,
    running_polls: u32,
    next_operation: u64,
    next_fingerprint: u64,
    clock: i64,
    mutations: usize,
    polls: usize,
}

/// Collections the fake knows how to list and create into
const COLLECTIONS: &[&str] = &[
    "instances",
    "snapshots",
    "storage-pools",
    "networks",
    "forwards",
    "peers",
    "network-acls",
    "network-zones",
    "records",
    "profiles",
    "images",
    "aliases",
    "members",
];

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_collection(path: &str) -> bool {
    let parts = segments(path);
    match parts.as_slice() {
        [] => false,
        [.., parent, _] if *parent == "volumes" => true,
        [.., last] => COLLECTIONS.contains(last),
    }
}

/// Object a nested collection belongs to
fn owner_of(collection: &str) -> Option<String> {
    let mut parts = segments(collection);
    parts.pop();
    if parts.last() == Some(&"volumes") {
        parts.pop();
    }
    if parts.len() >= 2 {
        Some(format!("/{}", parts.join("/")))
    } else {
        None
    }
}

fn identity_field(collection: &str) -> &'static str {
    if collection.ends_with("/cluster/members") {
        "server_name"
    } else if collection.ends_with("/forwards") {
        "listen_address"
    } else {
        "name"
    }
}

fn query_param<'q>(query: &'q str, key: &str) -> Option<&'q str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

impl FakeState {
    fn tick(&mut self) -> String {
        self.clock += 1;
        DateTime::from_timestamp(1_700_000_000 + self.clock * 60, 0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn handle(&mut self, request: &HttpRequest) -> (u16, Bytes) {
        let full = request
            .path
            .strip_prefix(crate::client::API_ROOT)
            .unwrap_or(&request.path);
        let (path, query) = full.split_once('?').unwrap_or((full, ""));
        let reply = self.dispatch(&request.method, path, query, &request.body);
        self.finish(reply)
    }

    fn dispatch(&mut self, method: &Method, path: &str, query: &str, body: &Body) -> Reply {
        let injected = self
            .failures
            .iter()
            .find(|(m, p, _)| m == method && p == path)
            .map(|(_, _, failure)| failure.clone());
        if let Some(failure) = injected {
            return match failure {
                Failure::Status { status, message } => Reply::Error(status, message),
                Failure::Operation(message) => Reply::Async {
                    result: Err(message),
                    mutation: false,
                },
            };
        }

        match *method {
            Method::GET => self.get(path, query),
            Method::POST => self.post(path, body),
            Method::PUT => self.put(path, body),
            Method::DELETE => self.delete(path),
            _ => Reply::Error(405, format!("method {} not allowed", method)),
        }
    }

    fn finish(&mut self, reply: Reply) -> (u16, Bytes) {
        let (status, body) = match reply {
            Reply::Raw(bytes) => return (200, bytes),
            Reply::Sync(metadata) => (
                200,
                json!({"type": "sync", "status": "Success", "status_code": 200, "metadata": metadata}),
            ),
            Reply::Error(code, message) => (
                code,
                json!({"type": "error", "error": message, "error_code": code}),
            ),
            Reply::Async { result, mutation } => {
                if mutation && result.is_ok() {
                    self.mutations += 1;
                }
                self.next_operation += 1;
                let id = format!("op-{}", self.next_operation);
                self.operations.insert(
                    id.clone(),
                    PendingOperation {
                        polls_left: self.running_polls,
                        result,
                    },
                );
                (
                    202,
                    json!({
                        "type": "async",
                        "status": "Operation created",
                        "status_code": 100,
                        "operation": format!("/1.0/operations/{}", id),
                        "metadata": {"id": id, "status_code": 100}
                    }),
                )
            }
        };
        (status, Bytes::from(body.to_string()))
    }

    /// Object as the server would render it
    fn view(&self, key: &str, object: &Value) -> Value {
        let mut object = object.clone();
        if let Some(fingerprint) = key.strip_prefix("/images/")
            && !fingerprint.contains('/')
            && let Some(map) = object.as_object_mut()
        {
            let aliases: Vec<Value> = self
                .objects
                .iter()
                .filter(|(k, alias)| k.starts_with("/images/aliases/") && alias["target"] == *fingerprint)
                .map(|(_, alias)| json!({"name": alias["name"], "description": ""}))
                .collect();
            map.insert("aliases".to_string(), Value::Array(aliases));
        }
        object
    }

    fn children(&self, collection: &str) -> Vec<(String, Value)> {
        let prefix = format!("{}/", collection);
        self.objects
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(key, object)| (key.clone(), self.view(key, object)))
            .collect()
    }

    fn get(&mut self, path: &str, query: &str) -> Reply {
        if let Some(id) = path.strip_prefix("/operations/") {
            return self.poll(id);
        }
        if let Some(object) = self.objects.get(path) {
            return Reply::Sync(self.view(path, object));
        }
        if let Some((parent, leaf)) = path.rsplit_once('/')
            && let Some(owner) = self.objects.get(parent)
        {
            match leaf {
                "state" => {
                    return Reply::Sync(json!({
                        "status": owner.get("status").cloned().unwrap_or(json!("")),
                        "state": "up",
                    }));
                }
                "leases" => return Reply::Sync(json!([])),
                "resources" => {
                    return Reply::Sync(json!({"space": {"used": 0, "total": 1_073_741_824u64}}));
                }
                "export" => return Reply::Raw(Bytes::from_static(b"fake image tarball")),
                _ => {}
            }
        }
        if is_collection(path) {
            if let Some(owner) = owner_of(path)
                && !self.objects.contains_key(&owner)
            {
                return Reply::not_found(&owner);
            }
            let children = self.children(path);
            let listing: Vec<Value> = if query_param(query, "recursion") == Some("1") {
                children.into_iter().map(|(_, object)| object).collect()
            } else {
                children
                    .into_iter()
                    .map(|(key, _)| json!(format!("/1.0{}", key)))
                    .collect()
            };
            return Reply::Sync(Value::Array(listing));
        }
        Reply::not_found(path)
    }

    fn poll(&mut self, id: &str) -> Reply {
        self.polls += 1;
        let Some(operation) = self.operations.get_mut(id) else {
            return Reply::not_found(&format!("/operations/{}", id));
        };
        if operation.polls_left > 0 {
            operation.polls_left -= 1;
            return Reply::Sync(json!({"id": id, "status": "Running", "status_code": 103}));
        }
        match &operation.result {
            Ok(metadata) => Reply::Sync(json!({
                "id": id,
                "status": "Success",
                "status_code": 200,
                "metadata": metadata,
            })),
            Err(message) => Reply::Sync(json!({
                "id": id,
                "status": "Failure",
                "status_code": 400,
                "err": message,
            })),
        }
    }

    fn post(&mut self, path: &str, body: &Body) -> Reply {
        if let Some(instance) = path.strip_suffix("/exec") {
            return self.exec(instance);
        }
        if let Some(image) = path.strip_suffix("/refresh") {
            if !self.objects.contains_key(image) {
                return Reply::not_found(image);
            }
            return Reply::accepted();
        }
        if let Some(image) = path.strip_suffix("/secret") {
            if !self.objects.contains_key(image) {
                return Reply::not_found(image);
            }
            return Reply::Async {
                result: Ok(json!({"secret": "c2VjcmV0"})),
                mutation: false,
            };
        }
        if path == "/images" {
            return self.create_image(body);
        }
        if self.objects.contains_key(path) {
            return self.rename(path, body);
        }
        if is_collection(path) {
            return self.create(path, body);
        }
        Reply::not_found(path)
    }

    fn exec(&mut self, instance: &str) -> Reply {
        if !self.objects.contains_key(instance) {
            return Reply::not_found(instance);
        }
        let name = instance.rsplit('/').next().unwrap_or(instance).to_string();
        if let Some(failure) = self.exec_failures.get_mut(&name)
            && failure.remaining > 0
        {
            failure.remaining -= 1;
            return Reply::Async {
                result: Err(failure.message.clone()),
                mutation: false,
            };
        }
        let code = self
            .exec_returns
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0);
        Reply::Async {
            result: Ok(json!({"return": code, "output": {}})),
            mutation: false,
        }
    }

    fn create(&mut self, collection: &str, body: &Body) -> Reply {
        let Some(mut object) = body.as_json().and_then(Value::as_object).cloned() else {
            return Reply::Error(400, "expected a JSON object".to_string());
        };
        if let Some(owner) = owner_of(collection)
            && !self.objects.contains_key(&owner)
        {
            return Reply::not_found(&owner);
        }
        let field = identity_field(collection);
        let Some(id) = object.get(field).and_then(Value::as_str).map(str::to_string) else {
            return Reply::Error(400, format!("missing {}", field));
        };
        let key = format!("{}/{}", collection, encode_segment(&id));
        if self.objects.contains_key(&key) {
            return Reply::Error(409, format!("{} already exists", id));
        }

        if collection.ends_with("/snapshots") && !object.contains_key("created_at") {
            let created_at = self.tick();
            object.insert("created_at".to_string(), json!(created_at));
        }
        if collection == "/instances" {
            object.entry("status").or_insert(json!("Stopped"));
        }
        if collection == "/cluster/members" {
            object.entry("status").or_insert(json!("Online"));
        }
        let parts = segments(collection);
        if let [.., "volumes", volume_type] = parts.as_slice() {
            object.insert("type".to_string(), json!(volume_type));
        }

        self.objects.insert(key, Value::Object(object));
        Reply::accepted()
    }

    fn create_image(&mut self, body: &Body) -> Reply {
        let mut public = false;
        let mut auto_update = false;
        let mut properties = Map::new();
        let mut aliases = Vec::new();

        match body {
            Body::Raw { headers, .. } => {
                for (name, value) in headers {
                    match name.as_str() {
                        "X-Incus-public" => public = value == "1",
                        "X-Incus-properties" => {
                            for (k, v) in value.split('&').filter_map(|p| p.split_once('=')) {
                                let decode = |s: &str| {
                                    urlencoding::decode(s)
                                        .map(|d| d.into_owned())
                                        .unwrap_or_else(|_| s.to_string())
                                };
                                properties.insert(decode(k), json!(decode(v)));
                            }
                        }
                        _ => {}
                    }
                }
            }
            Body::Json(request) => {
                if request["source"]["type"] == "snapshot" {
                    let source = request["source"]["name"].as_str().unwrap_or_default();
                    let Some((instance, snapshot)) = source.split_once('/') else {
                        return Reply::Error(400, format!("invalid snapshot source {}", source));
                    };
                    let key = format!(
                        "/instances/{}/snapshots/{}",
                        encode_segment(instance),
                        encode_segment(snapshot)
                    );
                    if !self.objects.contains_key(&key) {
                        return Reply::not_found(&key);
                    }
                }
                public = request["public"].as_bool().unwrap_or(false);
                auto_update = request["auto_update"].as_bool().unwrap_or(false);
                if let Some(map) = request["properties"].as_object() {
                    properties = map.clone();
                }
                if let Some(list) = request["aliases"].as_array() {
                    aliases = list
                        .iter()
                        .filter_map(|a| a["name"].as_str().map(str::to_string))
                        .collect();
                }
            }
            Body::Empty => return Reply::Error(400, "missing image source".to_string()),
        }

        self.next_fingerprint += 1;
        let fingerprint = format!("{:064x}", 0xfeed_0000u64 + self.next_fingerprint);
        self.objects.insert(
            format!("/images/{}", fingerprint),
            json!({
                "fingerprint": fingerprint,
                "public": public,
                "auto_update": auto_update,
                "properties": properties,
                "type": "container",
                "size": 1024,
            }),
        );
        for alias in aliases {
            self.objects.insert(
                format!("/images/aliases/{}", encode_segment(&alias)),
                json!({"name": alias, "target": fingerprint, "type": "container"}),
            );
        }

        Reply::Async {
            result: Ok(json!({"fingerprint": fingerprint, "size": 1024})),
            mutation: true,
        }
    }

    fn rename(&mut self, path: &str, body: &Body) -> Reply {
        let Some((collection, _)) = path.rsplit_once('/') else {
            return Reply::Error(400, "cannot rename the server".to_string());
        };
        let Some(new_name) = body
            .as_json()
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
        else {
            return Reply::Error(400, "missing name".to_string());
        };
        let new_key = format!("{}/{}", collection, encode_segment(new_name));
        if self.objects.contains_key(&new_key) {
            return Reply::Error(409, format!("{} already exists", new_name));
        }

        let prefix = format!("{}/", path);
        let moved: Vec<String> = self
            .objects
            .keys()
            .filter(|key| *key == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(mut object) = self.objects.remove(&key) {
                if key == path {
                    object[identity_field(collection)] = json!(new_name);
                }
                let renamed = format!("{}{}", new_key, &key[path.len()..]);
                self.objects.insert(renamed, object);
            }
        }
        Reply::accepted()
    }

    fn put(&mut self, path: &str, body: &Body) -> Reply {
        if let Some(instance) = path.strip_suffix("/state") {
            let Some(object) = self.objects.get_mut(instance) else {
                return Reply::not_found(instance);
            };
            let status = match body.as_json().and_then(|b| b["action"].as_str()) {
                Some("start" | "restart" | "unfreeze") => "Running",
                Some("stop") => "Stopped",
                Some("freeze") => "Frozen",
                other => return Reply::Error(400, format!("invalid action {:?}", other)),
            };
            object["status"] = json!(status);
            return Reply::accepted();
        }

        let Some(mut replacement) = body.as_json().and_then(Value::as_object).cloned() else {
            return Reply::Error(400, "expected a JSON object".to_string());
        };

        if path.is_empty() {
            let config = replacement.remove("config").unwrap_or_else(|| json!({}));
            let root = self
                .objects
                .entry(String::new())
                .or_insert_with(|| json!({}));
            root["config"] = config;
            return Reply::accepted();
        }

        let Some(current) = self.objects.get(path) else {
            return Reply::not_found(path);
        };

        if let Some(snapshot) = replacement.get("restore").and_then(Value::as_str) {
            let key = format!("{}/snapshots/{}", path, encode_segment(snapshot));
            if !self.objects.contains_key(&key) {
                return Reply::not_found(&key);
            }
            return Reply::accepted();
        }

        for field in [
            "name",
            "fingerprint",
            "listen_address",
            "server_name",
            "type",
            "status",
            "created_at",
        ] {
            if let Some(value) = current.get(field)
                && !replacement.contains_key(field)
            {
                replacement.insert(field.to_string(), value.clone());
            }
        }
        self.objects
            .insert(path.to_string(), Value::Object(replacement));
        Reply::accepted()
    }

    fn delete(&mut self, path: &str) -> Reply {
        let Some(object) = self.objects.get(path) else {
            return Reply::not_found(path);
        };
        if path.starts_with("/instances/")
            && !path.contains("/snapshots/")
            && object["status"] == "Running"
        {
            return Reply::Error(400, "Instance is running".to_string());
        }
        let prefix = format!("{}/", path);
        self.objects
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        Reply::accepted()
    }
}

/// In-memory control plane
#[derive(Clone)]
pub struct FakeIncus {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeIncus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FakeIncus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FakeIncus")
            .field("objects", &state.objects.len())
            .field("requests", &state.requests.len())
            .finish()
    }
}

impl FakeIncus {
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.objects.insert(
            String::new(),
            json!({"config": {}, "api_version": "1.0", "auth": "trusted"}),
        );
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Client talking to this fake with the default options
    pub fn client(&self) -> IncusClient {
        IncusClient::new(Arc::new(self.clone())).with_options(ClientOptions::default())
    }

    /// Store `object` at `endpoint` (e.g. `/instances/web`, `""` for the server)
    pub fn seed(&self, endpoint: &str, object: Value) {
        lock(&self.state)
            .objects
            .insert(endpoint.to_string(), object);
    }

    pub fn object(&self, endpoint: &str) -> Option<Value> {
        lock(&self.state).objects.get(endpoint).cloned()
    }

    /// Number of `Running` answers every new operation gives before it ends
    pub fn set_running_polls(&self, polls: u32) {
        lock(&self.state).running_polls = polls;
    }

    /// Exit codes for successive execs in `instance`; 0 once exhausted
    pub fn set_exec_returns(&self, instance: &str, codes: Vec<i64>) {
        lock(&self.state)
            .exec_returns
            .insert(instance.to_string(), codes.into());
    }

    /// Fail the next `times` execs in `instance` at the operation level
    pub fn fail_exec(&self, instance: &str, times: u32, message: &str) {
        lock(&self.state).exec_failures.insert(
            instance.to_string(),
            ExecFailure {
                remaining: times,
                message: message.to_string(),
            },
        );
    }

    /// Make every `method` request on `endpoint` fail
    pub fn fail_on(&self, method: Method, endpoint: &str, failure: Failure) {
        lock(&self.state)
            .failures
            .push((method, endpoint.to_string(), failure));
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.state).requests.clone()
    }

    /// Requests with `method` on `endpoint`, ignoring the query string
    pub fn count(&self, method: &str, endpoint: &str) -> usize {
        let target = format!("{}{}", crate::client::API_ROOT, endpoint);
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.method.as_str() == method)
            .filter(|r| r.path.split('?').next() == Some(target.as_str()))
            .count()
    }

    /// JSON body of the last `method` request on `endpoint`
    pub fn last_body(&self, method: &str, endpoint: &str) -> Option<Value> {
        let target = format!("{}{}", crate::client::API_ROOT, endpoint);
        lock(&self.state)
            .requests
            .iter()
            .rev()
            .filter(|r| r.method.as_str() == method)
            .find(|r| r.path.split('?').next() == Some(target.as_str()))
            .and_then(|r| r.body.as_json().cloned())
    }

    /// Accepted requests that changed state
    pub fn mutation_count(&self) -> usize {
        lock(&self.state).mutations
    }

    /// Operation polls seen so far
    pub fn poll_count(&self) -> usize {
        lock(&self.state).polls
    }
}

#[async_trait]
impl Transport for FakeIncus {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());
        let (status, body) = state.handle(&request);
        Ok(HttpResponse { status, body })
    }

    fn endpoint(&self) -> String {
        "fake".to_string()
    }
}
