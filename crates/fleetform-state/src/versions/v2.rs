//! Checkpoint schema version 2
//!
//! Adds plugin versions to the manifest, replaces the `delete` flag with a
//! resource status, and records the provider that manages each resource.

use crate::snapshot::ConfigMap;
use chrono::{DateTime, Utc};
use fleetform_resource::{PropertyMap, Urn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointV2 {
    pub stack: String,
    pub config: ConfigMap,
    pub manifest: ManifestV2,
    pub resources: Vec<ResourceV2>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestV2 {
    pub time: DateTime<Utc>,
    pub version: String,
    pub plugins: Vec<PluginInfoV2>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginInfoV2 {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderReferenceV2 {
    pub package: String,
    pub config: PropertyMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusV2 {
    Created,
    PendingCreate,
    PendingDelete,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceV2 {
    pub urn: Urn,
    #[serde(rename = "type")]
    pub type_token: String,
    pub id: String,
    pub inputs: PropertyMap,
    pub outputs: PropertyMap,
    pub parent: Option<Urn>,
    pub dependencies: Vec<Urn>,
    pub protect: bool,
    pub provider: Option<ProviderReferenceV2>,
    pub status: StatusV2,
}
