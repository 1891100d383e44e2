//! Control-plane API client

use crate::error::{ClientError, Result};
use crate::operation::{Operation, OperationRef, OperationStatus};
use crate::transport::{Body, HttpRequest, HttpResponse, HttpsTransport, Transport, UnixTransport};
use crate::wait::{WaitPolicy, poll_until};
use bytes::Bytes;
use http::Method;
use incusflow_config::{Connection, Settings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Versioned API root every endpoint lives under
pub const API_ROOT: &str = "/1.0";

/// Kind of a response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Sync,
    Async,
    Error,
}

/// Response envelope shared by every endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type", default)]
    pub kind: ResponseKind,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub error_code: u16,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Response {
    /// Operation reference carried by an async response.
    ///
    /// Taken from the top-level `operation` field, falling back to
    /// `metadata.operation` and then `metadata.id`.
    pub fn operation_ref(&self) -> Result<OperationRef> {
        if !self.operation.is_empty() {
            return OperationRef::parse(&self.operation);
        }
        if let Some(reference) = self.metadata.get("operation").and_then(Value::as_str) {
            return OperationRef::parse(reference);
        }
        if let Some(id) = self.metadata.get("id").and_then(Value::as_str) {
            return OperationRef::parse(&format!("{}/operations/{}", API_ROOT, id));
        }
        Err(ClientError::InvalidOperation(
            "async response without an operation reference".to_string(),
        ))
    }
}

/// Final outcome of a call made through [`IncusClient::sync_request`]
#[derive(Debug, Clone)]
pub enum Completion {
    /// The control plane answered synchronously
    Immediate(Response),
    /// The control plane deferred the work and the job succeeded
    Operation(Operation),
}

impl Completion {
    /// Payload of the response, or the result metadata of the job
    pub fn metadata(&self) -> &Value {
        match self {
            Completion::Immediate(response) => &response.metadata,
            Completion::Operation(operation) => &operation.metadata,
        }
    }

    pub fn into_metadata(self) -> Value {
        match self {
            Completion::Immediate(response) => response.metadata,
            Completion::Operation(operation) => operation.metadata,
        }
    }
}

/// Timing knobs for the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Upper bound for a single HTTP exchange
    pub request_timeout: Duration,
    /// Default wait for asynchronous operations
    pub operation: WaitPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            operation: WaitPolicy::operation(),
        }
    }
}

impl ClientOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            request_timeout: settings.timeouts.request(),
            operation: WaitPolicy::new(
                settings.timeouts.operation(),
                settings.timeouts.poll_interval(),
            ),
        }
    }
}

/// Client for the control-plane REST API
///
/// Cheap to clone; clones share the transport and the cancellation token.
#[derive(Clone)]
pub struct IncusClient {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
    cancel: CancellationToken,
}

impl std::fmt::Debug for IncusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncusClient")
            .field("endpoint", &self.transport.endpoint())
            .field("options", &self.options)
            .finish()
    }
}

impl IncusClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: ClientOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Client for a local control plane listening on `socket`
    pub fn unix(socket: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(UnixTransport::new(socket)))
    }

    /// Build a client from loaded connection settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let transport: Arc<dyn Transport> = match &settings.connection {
            Connection::Unix { socket } => Arc::new(UnixTransport::new(socket.clone())),
            Connection::Https {
                url,
                cert,
                key,
                verify,
            } => {
                let identity = match (cert, key) {
                    (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
                    _ => None,
                };
                Arc::new(HttpsTransport::new(url, identity, verify)?)
            }
        };
        Ok(Self::new(transport).with_options(ClientOptions::from_settings(settings)))
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort every wait loop of this client (and its clones) when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Perform one request and decode the response envelope.
    ///
    /// Non-2xx answers become [`ClientError::Api`]; nothing is retried.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<Response> {
        let body = body.map(Body::Json).unwrap_or_default();
        let response = self.exchange(method.clone(), endpoint, body.clone(), query).await?;
        let path = build_path(endpoint, query);

        if !response.is_success() {
            return Err(self.api_error(&method, &path, query, &body, &response));
        }

        let envelope: Response = serde_json::from_slice(&response.body).map_err(|e| {
            ClientError::Decode(format!("{} {}: {}", method, path, e))
        })?;

        if envelope.kind == ResponseKind::Error {
            return Err(ClientError::Api {
                status: envelope.error_code,
                message: envelope.error,
            });
        }

        Ok(envelope)
    }

    /// Perform one request and return the raw body (image export)
    pub async fn request_raw(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Bytes> {
        let response = self.exchange(method.clone(), endpoint, Body::Empty, query).await?;
        if !response.is_success() {
            let path = build_path(endpoint, query);
            return Err(self.api_error(&method, &path, query, &Body::Empty, &response));
        }
        Ok(response.body)
    }

    /// Perform a request and, when the control plane defers it, wait for
    /// the resulting operation with the default policy.
    pub async fn sync_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<Completion> {
        self.sync_request_with(method, endpoint, body, query, self.options.operation)
            .await
    }

    /// [`sync_request`](Self::sync_request) with an explicit wait policy
    pub async fn sync_request_with(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
        policy: WaitPolicy,
    ) -> Result<Completion> {
        let response = self.request(method, endpoint, body, query).await?;
        self.complete(response, policy).await
    }

    /// Upload a raw payload and wait for the resulting operation
    pub async fn upload(
        &self,
        endpoint: &str,
        data: Bytes,
        headers: Vec<(String, String)>,
        policy: WaitPolicy,
    ) -> Result<Completion> {
        let body = Body::Raw { data, headers };
        let response = self.exchange(Method::POST, endpoint, body, &[]).await?;
        if !response.is_success() {
            let path = build_path(endpoint, &[]);
            return Err(self.api_error(&Method::POST, &path, &[], &Body::Empty, &response));
        }
        let envelope: Response = serde_json::from_slice(&response.body)
            .map_err(|e| ClientError::Decode(format!("POST {}: {}", endpoint, e)))?;
        self.complete(envelope, policy).await
    }

    async fn complete(&self, response: Response, policy: WaitPolicy) -> Result<Completion> {
        if response.kind != ResponseKind::Async {
            return Ok(Completion::Immediate(response));
        }
        let reference = response.operation_ref()?;
        let operation = self
            .wait_for_operation(reference.as_str(), policy)
            .await?;
        Ok(Completion::Operation(operation))
    }

    /// Poll an operation until it succeeds, fails or `policy.timeout` passes.
    ///
    /// `Created`, `Started` and `Running` keep polling after sleeping
    /// `policy.interval`; `Success` returns the operation; `Failure` and
    /// any other code are errors. A malformed reference fails without a
    /// single request.
    pub async fn wait_for_operation(&self, reference: &str, policy: WaitPolicy) -> Result<Operation> {
        let reference = OperationRef::parse(reference)?;
        let endpoint = reference.endpoint();
        let id = reference.id();
        let what = format!("operation {}", reference);

        poll_until(policy, &self.cancel, &what, move || async move {
            let response = self.request(Method::GET, endpoint, None, &[]).await?;
            let operation: Operation = serde_json::from_value(response.metadata)?;

            match operation.state() {
                OperationStatus::Created | OperationStatus::Started | OperationStatus::Running => {
                    tracing::debug!(
                        "operation {} still in progress (status_code {})",
                        id,
                        operation.status_code
                    );
                    Ok(ControlFlow::Continue(()))
                }
                OperationStatus::Success => Ok(ControlFlow::Break(operation)),
                OperationStatus::Failure => Err(ClientError::OperationFailed {
                    id: id.to_string(),
                    message: operation.err,
                }),
                OperationStatus::Unexpected(code) => Err(ClientError::UnexpectedStatus {
                    id: id.to_string(),
                    code,
                }),
            }
        })
        .await
    }

    async fn exchange(
        &self,
        method: Method,
        endpoint: &str,
        body: Body,
        query: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let path = build_path(endpoint, query);
        tracing::debug!("{} {} via {}", method, path, self.transport.endpoint());

        let request = HttpRequest { method, path, body };
        match tokio::time::timeout(self.options.request_timeout, self.transport.send(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transport(format!(
                "request timed out after {}s",
                self.options.request_timeout.as_secs()
            ))),
        }
    }

    fn api_error(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        body: &Body,
        response: &HttpResponse,
    ) -> ClientError {
        let text = String::from_utf8_lossy(&response.body);
        let message = serde_json::from_slice::<Response>(&response.body)
            .ok()
            .map(|envelope| envelope.error)
            .filter(|error| !error.is_empty())
            .unwrap_or_else(|| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    http::StatusCode::from_u16(response.status)
                        .ok()
                        .and_then(|s| s.canonical_reason())
                        .unwrap_or("unknown error")
                        .to_string()
                } else {
                    trimmed.to_string()
                }
            });

        if response.status >= 500 {
            let request_body = body
                .as_json()
                .map(|v| v.to_string())
                .unwrap_or_default();
            tracing::error!(
                status = response.status,
                method = %method,
                url = %format!("{}{}", self.transport.endpoint(), path),
                params = ?query,
                request_body = %request_body,
                response_body = %text,
                "control plane returned a server error"
            );
        }

        ClientError::Api {
            status: response.status,
            message,
        }
    }
}

/// `/1.0` + endpoint + percent-encoded query string
pub(crate) fn build_path(endpoint: &str, query: &[(&str, &str)]) -> String {
    let mut path = format!("{}{}", API_ROOT, endpoint);
    if !query.is_empty() {
        let pairs: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        path.push(if endpoint.contains('?') { '&' } else { '?' });
        path.push_str(&pairs.join("&"));
    }
    path
}

/// Percent-encode one path segment
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
