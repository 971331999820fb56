//! Resource model error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Invalid property value: {0}")]
    InvalidValue(String),

    #[error("Unknown value signature: {0}")]
    UnknownSignature(String),

    #[error("Invalid property path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Property path '{0}' does not match the shape of the value")]
    PathMismatch(String),

    #[error("Invalid URN: {0}")]
    InvalidUrn(String),
}

pub type Result<T> = std::result::Result<T, ResourceError>;
