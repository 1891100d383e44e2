//! Transports carrying HTTP requests to the control plane
//!
//! The client never builds URLs with a host in them. It hands a
//! [`HttpRequest`] holding the method, the path (already rooted at
//! `/1.0`) and a body to a [`Transport`], which decides how the bytes
//! reach the server:
//!
//! - [`UnixTransport`]: HTTP/1.1 over the local Unix domain socket
//! - [`HttpsTransport`]: HTTPS with optional client certificates

mod https;
mod unix;

pub use https::HttpsTransport;
pub use unix::UnixTransport;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use serde_json::Value;

/// Request body
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    /// Raw payload with extra headers (image uploads)
    Raw {
        data: Bytes,
        headers: Vec<(String, String)>,
    },
}

impl Body {
    /// JSON view of the body for diagnostics
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// A request as seen by a transport
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path and query, e.g. `/1.0/instances?recursion=1`
    pub path: String,
    pub body: Body,
}

/// Raw response from a transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves requests to the control plane and returns the raw answer.
///
/// Implementations must be reusable across sequential calls and must not
/// rely on session affinity. Connection-level failures are reported as
/// [`ClientError::Transport`](crate::ClientError::Transport); an HTTP
/// answer of any status is a successful send.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}
