//! Results of state functions and of whole runs

use crate::diff::Diff;
use serde::Serialize;

/// What a state function did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Applied {
    /// The resource was modified
    Changed,
    /// Already converged
    Unchanged,
    /// Dry run: the resource would be modified
    Pending,
}

impl Applied {
    /// Tri-state result: `Some(true)` when done, `None` when only planned
    pub fn result(&self) -> Option<bool> {
        match self {
            Applied::Changed | Applied::Unchanged => Some(true),
            Applied::Pending => None,
        }
    }
}

impl std::fmt::Display for Applied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Applied::Changed => write!(f, "changed"),
            Applied::Unchanged => write!(f, "unchanged"),
            Applied::Pending => write!(f, "pending"),
        }
    }
}

/// Result of one state function call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    /// Resource the state was about
    pub name: String,

    pub applied: Applied,

    /// Fields changed (or that would change in a dry run)
    pub diff: Diff,

    pub comment: String,

    /// Identity assigned by the control plane, e.g. an image fingerprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized: Option<String>,
}

impl Outcome {
    pub fn unchanged(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applied: Applied::Unchanged,
            diff: Diff::new(),
            comment: comment.into(),
            realized: None,
        }
    }

    pub fn changed(name: impl Into<String>, diff: Diff, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applied: Applied::Changed,
            diff,
            comment: comment.into(),
            realized: None,
        }
    }

    pub fn pending(name: impl Into<String>, diff: Diff, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applied: Applied::Pending,
            diff,
            comment: comment.into(),
            realized: None,
        }
    }

    pub fn with_realized(mut self, identity: impl Into<String>) -> Self {
        self.realized = Some(identity.into());
        self
    }

    pub fn is_changed(&self) -> bool {
        self.applied == Applied::Changed
    }

    pub fn result(&self) -> Option<bool> {
        self.applied.result()
    }
}

/// One state of a run
#[derive(Debug)]
pub struct StateReport {
    pub id: String,
    pub function: String,
    pub result: crate::Result<Outcome>,
}

impl StateReport {
    /// `Some(true)` done, `None` pending, `Some(false)` failed
    pub fn result(&self) -> Option<bool> {
        match &self.result {
            Ok(outcome) => outcome.result(),
            Err(_) => Some(false),
        }
    }
}

/// Results of every state in a state file, in order
#[derive(Debug, Default)]
pub struct Report {
    pub states: Vec<StateReport>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: String, function: String, result: crate::Result<Outcome>) {
        self.states.push(StateReport {
            id,
            function,
            result,
        });
    }

    pub fn is_success(&self) -> bool {
        self.states.iter().all(|s| s.result.is_ok())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for state in &self.states {
            match &state.result {
                Ok(outcome) => match outcome.applied {
                    Applied::Changed => summary.changed += 1,
                    Applied::Unchanged => summary.unchanged += 1,
                    Applied::Pending => summary.pending += 1,
                },
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Counts per result class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub changed: usize,
    pub pending: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} changed, {} pending, {} unchanged, {} failed",
            self.changed, self.pending, self.unchanged, self.failed
        )
    }
}
