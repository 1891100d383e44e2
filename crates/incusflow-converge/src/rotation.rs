//! Retention of snapshots matching a name pattern
//!
//! Matching snapshots are ordered oldest first by creation time; all but
//! the newest `keep` are deleted. The same policy serves instance and
//! volume snapshots since both are a `Collection<'_, Snapshot>`.

use crate::error::{Annotate, ConvergeError, Result};
use glob::Pattern;
use incusflow_client::{Collection, Snapshot};
use serde::Serialize;

/// Pattern plus retention count
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pattern: Pattern,
    keep: usize,
}

/// Snapshots to keep and to delete, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationPlan {
    pub matched: usize,
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationFailure {
    pub name: String,
    pub error: String,
}

/// What a rotation did (or would do in a dry run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub matched: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<RotationFailure>,
    pub dry_run: bool,
}

impl RotationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Deletions attempted
    pub fn planned(&self) -> usize {
        self.deleted.len() + self.failed.len()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }
}

impl RotationPolicy {
    /// Shell-style pattern (`*`, `?`, `[...]`), matched case-sensitively
    pub fn new(pattern: &str, keep: usize) -> Result<Self> {
        let pattern = Pattern::new(pattern).map_err(|e| {
            ConvergeError::Validation(format!("invalid snapshot pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { pattern, keep })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches(name)
    }

    pub fn plan(&self, snapshots: &[Snapshot]) -> RotationPlan {
        let mut matching: Vec<&Snapshot> = snapshots
            .iter()
            .filter(|s| self.matches(s.short_name()))
            .collect();
        // stable: equal timestamps keep listing order; missing ones sort first
        matching.sort_by_key(|s| s.created_at);

        let excess = matching.len().saturating_sub(self.keep);
        let names = |slice: &[&Snapshot]| -> Vec<String> {
            slice.iter().map(|s| s.short_name().to_string()).collect()
        };
        RotationPlan {
            matched: matching.len(),
            delete: names(&matching[..excess]),
            keep: names(&matching[excess..]),
        }
    }
}

/// Apply `policy` to a snapshot collection
pub async fn rotate(
    snapshots: &Collection<'_, Snapshot>,
    policy: &RotationPolicy,
    dry_run: bool,
) -> Result<RotationReport> {
    let current = snapshots
        .list()
        .await
        .annotate("list snapshots of", snapshots.parent_path())?;
    let plan = policy.plan(&current);
    execute(snapshots, plan, dry_run).await
}

/// Delete the snapshots `plan` selected
///
/// Every planned deletion is attempted even when an earlier one fails; a
/// single failure turns the whole call into [`ConvergeError::Rotation`].
pub async fn execute(
    snapshots: &Collection<'_, Snapshot>,
    plan: RotationPlan,
    dry_run: bool,
) -> Result<RotationReport> {
    let owner = snapshots.parent_path();
    let mut report = RotationReport {
        matched: plan.matched,
        dry_run,
        ..Default::default()
    };

    if dry_run {
        report.deleted = plan.delete;
        return Ok(report);
    }

    for name in plan.delete {
        match snapshots.delete(&name).await {
            Ok(_) => {
                tracing::info!("deleted snapshot {} of {}", name, owner);
                report.deleted.push(name);
            }
            Err(e) => {
                tracing::warn!("failed to delete snapshot {} of {}: {}", name, owner, e);
                report.failed.push(RotationFailure {
                    name,
                    error: e.to_string(),
                });
            }
        }
    }

    if report.is_success() {
        Ok(report)
    } else {
        Err(ConvergeError::Rotation { report })
    }
}
