//! Client error types

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the control-plane client
///
/// Every variant maps onto one failure class: connection problems
/// (`Transport`), non-2xx answers (`Api`), asynchronous jobs that ended
/// badly (`OperationFailed`, `UnexpectedStatus`), waits that ran out of
/// time (`Timeout`, `Cancelled`) and caller mistakes caught before any
/// request was sent (`Validation`).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Operation {id} failed: {message}")]
    OperationFailed { id: String, message: String },

    #[error("Operation {id} ended with unexpected status_code {code}")]
    UnexpectedStatus { id: String, code: u16 },

    #[error("Invalid operation reference: {0}")]
    InvalidOperation(String),

    #[error("Timed out after {secs}s waiting for {what}", secs = .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid response from control plane: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// HTTP status of the failed request, when there was one
    pub fn error_code(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::Api { status: 404, .. } | ClientError::NotFound { .. }
        )
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.error_code(), Some(code) if code >= 500)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_only_for_api_errors() {
        let api = ClientError::Api {
            status: 404,
            message: "not found".to_string(),
        };
        assert_eq!(api.error_code(), Some(404));
        assert!(api.is_not_found());
        assert!(!api.is_server_error());

        let transport = ClientError::Transport("connection refused".to_string());
        assert_eq!(transport.error_code(), None);
        assert!(!transport.is_not_found());
    }

    #[test]
    fn test_timeout_message() {
        let err = ClientError::Timeout {
            what: "operation /1.0/operations/abc".to_string(),
            after: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 300s waiting for operation /1.0/operations/abc"
        );
    }

    #[test]
    fn test_server_error() {
        let err = ClientError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_server_error());
    }
}
