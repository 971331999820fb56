//! Engine error types
//!
//! [`EngineError`] aborts a whole deployment. [`ResourceFailure`] is scoped to
//! one resource: it is reported in the result, and only that resource's
//! dependents are skipped.

use crate::plan::StepOp;
use fleetform_provider::{CheckFailure, ProviderError};
use fleetform_resource::Urn;
use fleetform_state::StateError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Duplicate resource goal: {0}")]
    DuplicateGoal(Urn),

    #[error("Resource {urn} depends on unknown resource {dependency}")]
    UnknownDependency { urn: Urn, dependency: Urn },

    #[error("Dependency cycle involving {0}")]
    Cycle(Urn),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a single resource's operation did not complete
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceFailure {
    /// Check or Diff rejected the inputs; nothing was mutated
    #[error("validation failed: {}", describe(.failures))]
    Validation { failures: Vec<CheckFailure> },

    /// Create/Update/Delete failed; the snapshot holds the best-known state
    #[error("{op} failed: {message}")]
    Operation { op: StepOp, message: String },

    /// Outcome unknown; an operator must resolve it
    #[error("state is indeterminate: {message}")]
    Indeterminate { message: String },

    /// The provider is unreachable; later calls to it are skipped
    #[error("provider unreachable: {message}")]
    Transport { message: String },

    #[error("resource is protected and cannot be {op}d")]
    Protected { op: StepOp },
}

fn describe(failures: &[CheckFailure]) -> String {
    failures
        .iter()
        .map(|f| {
            if f.property.is_empty() {
                f.reason.clone()
            } else {
                format!("{}: {}", f.property, f.reason)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResourceFailure {
    /// Failure of a Check/Diff/configure call
    pub fn validation(error: ProviderError) -> Self {
        match error {
            ProviderError::Transport(message) => ResourceFailure::Transport { message },
            ProviderError::InvalidConfig { failures, .. } => {
                ResourceFailure::Validation { failures }
            }
            other => ResourceFailure::Validation {
                failures: vec![CheckFailure::new("", other.to_string())],
            },
        }
    }

    /// Failure of a Create/Update/Delete call
    pub fn operation(op: StepOp, error: ProviderError) -> Self {
        match error {
            ProviderError::Transport(message) => ResourceFailure::Transport { message },
            other => ResourceFailure::Operation {
                op,
                message: other.to_string(),
            },
        }
    }
}
