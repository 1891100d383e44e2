//! Declarative convergence for Incus resources
//!
//! Each state function fetches the live object, computes a field-level
//! [`Diff`] against the desired arguments and sends only what changed.
//! With [`Context::with_dry_run`] the diff is reported and nothing is sent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            incusflow apply / plan                │
//! └─────────────────┬───────────────────────────────┘
//!                   │ StateFile
//! ┌─────────────────▼───────────────────────────────┐
//! │               incusflow-converge                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Registry::dispatch(name, args)           │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  states::*  (fetch → diff → patch)        │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Changeset   │  │  Rotation    │            │
//! │  └──────────────┘  └──────────────┘            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               incusflow-client                   │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod diff;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod rotation;
pub mod states;

// Re-exports
pub use context::Context;
pub use diff::{Change, Changeset, Diff, DiffEntry};
pub use error::{ConvergeError, Result};
pub use outcome::{Applied, Outcome, Report, RunSummary, StateReport};
pub use registry::{Registry, StateEntry, StateFile};
pub use rotation::{RotationPlan, RotationPolicy, RotationReport, rotate};
