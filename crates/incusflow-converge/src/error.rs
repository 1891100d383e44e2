//! Convergence error types

use crate::rotation::RotationReport;
use incusflow_client::ClientError;
use thiserror::Error;

/// Errors that abort a state function
#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("Failed to {operation} {resource}: {source}{hint}", hint = troubleshooting_hint(.source))]
    Api {
        operation: String,
        resource: String,
        source: ClientError,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Failed to delete {} of {} snapshot(s): {}", .report.failed.len(), .report.planned(), .report.failed_names().join(", "))]
    Rotation { report: RotationReport },

    #[error("State file error: {0}")]
    StateFile(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvergeError {
    pub fn api(operation: impl Into<String>, resource: impl Into<String>, source: ClientError) -> Self {
        ConvergeError::Api {
            operation: operation.into(),
            resource: resource.into(),
            source,
        }
    }

    /// Underlying client error, when the failure came from the control plane
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            ConvergeError::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn troubleshooting_hint(error: &ClientError) -> &'static str {
    if error.is_server_error() {
        " (the control plane reported an internal error; check `incus info` and the daemon log, e.g. `journalctl -u incus`)"
    } else {
        ""
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;

/// Attach the attempted operation and resource to client failures
pub(crate) trait Annotate<T> {
    fn annotate(self, operation: &str, resource: &str) -> Result<T>;
}

impl<T> Annotate<T> for incusflow_client::Result<T> {
    fn annotate(self, operation: &str, resource: &str) -> Result<T> {
        self.map_err(|e| ConvergeError::api(operation, resource, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_carry_a_hint() {
        let err = ConvergeError::api(
            "create",
            "instance web",
            ClientError::Api {
                status: 500,
                message: "boom".to_string(),
            },
        );
        let message = err.to_string();
        assert!(message.starts_with("Failed to create instance web: API error (500): boom"));
        assert!(message.contains("journalctl"));
    }

    #[test]
    fn test_client_errors_have_no_hint() {
        let err = ConvergeError::api(
            "delete",
            "profile web",
            ClientError::Api {
                status: 404,
                message: "not found".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Failed to delete profile web: API error (404): not found"
        );
        assert_eq!(err.client_error().and_then(|e| e.error_code()), Some(404));
    }

    #[test]
    fn test_annotate() {
        let result: incusflow_client::Result<()> =
            Err(ClientError::Validation("bad".to_string()));
        let err = result.annotate("update", "network br0").unwrap_err();
        assert!(matches!(err, ConvergeError::Api { ref operation, .. } if operation == "update"));
    }
}
