//! Asynchronous operations

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix every operation reference must start with
pub const OPERATIONS_PREFIX: &str = "/1.0/operations/";

/// Status of a server-side job, as reported in `status_code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Created,
    Started,
    Running,
    Success,
    Failure,
    /// Any code outside the known set
    Unexpected(u16),
}

impl OperationStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            100 => OperationStatus::Created,
            101 => OperationStatus::Started,
            103 => OperationStatus::Running,
            200 => OperationStatus::Success,
            400 => OperationStatus::Failure,
            other => OperationStatus::Unexpected(other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            OperationStatus::Created | OperationStatus::Started | OperationStatus::Running
        )
    }
}

/// Operation descriptor returned when polling `/operations/<id>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    /// Job result, e.g. `{"fingerprint": ...}` or `{"return": 0}`
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub err: String,
}

impl Operation {
    pub fn state(&self) -> OperationStatus {
        OperationStatus::from_code(self.status_code)
    }
}

/// Validated reference to an operation, e.g. `/1.0/operations/abc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRef(String);

impl OperationRef {
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.strip_prefix(OPERATIONS_PREFIX) {
            Some(id) if !id.is_empty() && !id.starts_with('/') => Ok(Self(reference.to_string())),
            _ => Err(ClientError::InvalidOperation(reference.to_string())),
        }
    }

    /// Path relative to the API root, used for polling
    pub fn endpoint(&self) -> &str {
        &self.0["/1.0".len()..]
    }

    pub fn id(&self) -> &str {
        let id = &self.0[OPERATIONS_PREFIX.len()..];
        id.split(['/', '?']).next().unwrap_or(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
