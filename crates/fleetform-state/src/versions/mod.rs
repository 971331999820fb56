//! Frozen checkpoint schemas
//!
//! Each version's types are never edited once released. A new schema revision
//! adds a new module plus a paired upgrade/downgrade step in [`crate::migrate`].

pub mod v1;
pub mod v2;
pub mod v3;

pub use v1::{CheckpointV1, ManifestV1, ResourceV1};
pub use v2::{CheckpointV2, ManifestV2, PluginInfoV2, ProviderReferenceV2, ResourceV2, StatusV2};
pub use v3::{CheckpointV3, CustomTimeoutsV3, ResourceV3, StatusV3};

use crate::error::{Result, StateError};
use serde_json::Value;

/// Schema version written by this engine
pub const CURRENT_VERSION: u32 = 3;

/// A decoded checkpoint tagged with its schema version
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedCheckpoint {
    V1(CheckpointV1),
    V2(CheckpointV2),
    V3(CheckpointV3),
}

impl VersionedCheckpoint {
    pub fn version(&self) -> u32 {
        match self {
            VersionedCheckpoint::V1(_) => 1,
            VersionedCheckpoint::V2(_) => 2,
            VersionedCheckpoint::V3(_) => 3,
        }
    }

    pub fn stack(&self) -> &str {
        match self {
            VersionedCheckpoint::V1(c) => &c.stack,
            VersionedCheckpoint::V2(c) => &c.stack,
            VersionedCheckpoint::V3(c) => &c.stack,
        }
    }

    pub fn resource_count(&self) -> usize {
        match self {
            VersionedCheckpoint::V1(c) => c.resources.len(),
            VersionedCheckpoint::V2(c) => c.resources.len(),
            VersionedCheckpoint::V3(c) => c.resources.len(),
        }
    }

    /// Decode a checkpoint body of the given version, refusing unknown shapes
    pub fn decode(version: u32, body: Value) -> Result<Self> {
        let decoded = match version {
            1 => serde_json::from_value(body).map(VersionedCheckpoint::V1),
            2 => serde_json::from_value(body).map(VersionedCheckpoint::V2),
            3 => serde_json::from_value(body).map(VersionedCheckpoint::V3),
            found => {
                return Err(StateError::UnsupportedVersion {
                    found,
                    supported: CURRENT_VERSION,
                });
            }
        };
        decoded.map_err(|e| StateError::Decode(format!("version {} body: {}", version, e)))
    }

    pub fn encode(&self) -> Result<Value> {
        let body = match self {
            VersionedCheckpoint::V1(c) => serde_json::to_value(c)?,
            VersionedCheckpoint::V2(c) => serde_json::to_value(c)?,
            VersionedCheckpoint::V3(c) => serde_json::to_value(c)?,
        };
        Ok(body)
    }
}
