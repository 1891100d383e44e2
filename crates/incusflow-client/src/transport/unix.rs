//! HTTP/1.1 over a Unix domain socket

use super::{Body, HttpRequest, HttpResponse, Transport};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

/// Host header sent over the socket. The server ignores it.
const PLACEHOLDER_HOST: &str = "localhost";

/// Talks to a local control plane through its Unix socket.
///
/// Each request opens its own connection, so concurrent callers never
/// share connection state.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    socket: PathBuf,
}

impl UnixTransport {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn transport_error(&self, what: &str, err: impl std::fmt::Display) -> ClientError {
        ClientError::Transport(format!("{} ({}): {}", what, self.socket.display(), err))
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| self.transport_error("failed to connect to socket", e))?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| self.transport_error("HTTP handshake failed", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("unix socket connection closed with error: {}", e);
            }
        });

        let mut builder = http::Request::builder()
            .method(request.method)
            .uri(request.path.as_str())
            .header(HOST, PLACEHOLDER_HOST);

        let payload = match request.body {
            Body::Empty => Bytes::new(),
            Body::Json(value) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(&value)?)
            }
            Body::Raw { data, headers } => {
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
                data
            }
        };

        let http_request = builder
            .body(Full::new(payload))
            .map_err(|e| self.transport_error("invalid request", e))?;

        let response = sender
            .send_request(http_request)
            .await
            .map_err(|e| self.transport_error("request failed", e))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| self.transport_error("failed to read response body", e))?
            .to_bytes();

        Ok(HttpResponse { status, body })
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.socket.display())
    }
}
