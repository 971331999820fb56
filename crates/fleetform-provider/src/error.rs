//! Provider error types

use crate::types::CheckFailure;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by provider calls
///
/// A transport failure is reported exactly like a protocol-level failure of
/// the in-flight call, and additionally poisons the provider handle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider transport failed: {0}")]
    Transport(String),

    #[error("Provider operation failed: {0}")]
    Operation(String),

    #[error("Update failed: {message} (provider reports rollback: {rolled_back})")]
    UpdateFailed { message: String, rolled_back: bool },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider '{0}' is not configured")]
    NotConfigured(String),

    #[error("Invalid configuration for provider '{package}' ({} failures)", .failures.len())]
    InvalidConfig {
        package: String,
        failures: Vec<CheckFailure>,
    },

    #[error("Unknown provider package: {0}")]
    UnknownPackage(String),
}

impl ProviderError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
