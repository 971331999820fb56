//! Checkpoint schema version 1

use crate::snapshot::ConfigMap;
use chrono::{DateTime, Utc};
use fleetform_resource::{PropertyMap, Urn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointV1 {
    pub stack: String,
    pub config: ConfigMap,
    pub manifest: ManifestV1,
    pub resources: Vec<ResourceV1>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestV1 {
    pub time: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceV1 {
    pub urn: Urn,
    #[serde(rename = "type")]
    pub type_token: String,
    pub id: String,
    pub inputs: PropertyMap,
    pub outputs: PropertyMap,
    pub parent: Option<Urn>,
    pub dependencies: Vec<Urn>,
    pub protect: bool,
    /// Pending deletion
    pub delete: bool,
}
