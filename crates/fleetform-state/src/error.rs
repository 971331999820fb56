//! State error types

use fleetform_resource::Urn;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed checkpoint; the engine refuses to infer its structure
    #[error("Cannot decode checkpoint: {0}")]
    Decode(String),

    #[error("Checkpoint version {found} is not supported (supported: 1..={supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Duplicate resource: {0}")]
    DuplicateUrn(Urn),

    #[error("Resource {urn} would precede its dependency {dependency}")]
    DependencyOrder { urn: Urn, dependency: Urn },

    #[error("Resource {urn} is still referenced by {by}")]
    StillReferenced { urn: Urn, by: Urn },

    #[error("Resource not found: {0}")]
    NotFound(Urn),

    #[error("Snapshot integrity violation: {0}")]
    Integrity(String),
}

pub type Result<T> = std::result::Result<T, StateError>;
