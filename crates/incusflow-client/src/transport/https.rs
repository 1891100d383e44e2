//! HTTPS transport for remote control planes

use super::{Body, HttpRequest, HttpResponse, Transport};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use incusflow_config::Verify;
use std::path::Path;

/// Talks to a remote control plane over TLS.
pub struct HttpsTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpsTransport {
    /// Build a transport for `base_url` (scheme and authority only).
    ///
    /// `identity` is a client certificate/key pair in PEM form.
    pub fn new(base_url: &str, identity: Option<(&Path, &Path)>, verify: &Verify) -> Result<Self> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();

        if let Some((cert, key)) = identity {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                ClientError::Transport(format!("invalid client certificate: {}", e))
            })?;
            builder = builder.identity(identity);
        }

        match verify {
            Verify::Enabled(true) => {}
            Verify::Enabled(false) => {
                tracing::warn!("server certificate verification is disabled for {}", base_url);
                builder = builder.danger_accept_invalid_certs(true);
            }
            Verify::CaBundle(path) => {
                let ca = reqwest::Certificate::from_pem(&read_pem(path)?).map_err(|e| {
                    ClientError::Transport(format!("invalid CA bundle {}: {}", path.display(), e))
                })?;
                builder = builder.add_root_certificate(ca);
            }
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTPS client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| ClientError::Transport(format!("failed to read {}: {}", path.display(), e)))
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method, &url);

        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Raw { data, headers } => {
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
                builder.body(data)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            ClientError::Transport(format!("failed to read response from {}: {}", url, e))
        })?;

        Ok(HttpResponse { status, body })
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let transport =
            HttpsTransport::new("https://incus.example.com:8443/", None, &Verify::default())
                .unwrap();
        assert_eq!(transport.endpoint(), "https://incus.example.com:8443");
    }

    #[test]
    fn test_missing_client_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.crt");
        let key = dir.path().join("client.key");

        let result = HttpsTransport::new(
            "https://incus.example.com:8443",
            Some((cert.as_path(), key.as_path())),
            &Verify::default(),
        );
        match result {
            Err(ClientError::Transport(msg)) => assert!(msg.contains("client.crt")),
            Err(other) => panic!("Expected transport error, got {:?}", other),
            Ok(_) => panic!("Expected an error for a missing certificate"),
        }
    }
}
