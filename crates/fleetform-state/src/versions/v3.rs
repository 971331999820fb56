//! Checkpoint schema version 3 (current)
//!
//! Adds per-resource timeout overrides and the `indeterminate` status.

use super::v2::{ManifestV2, PluginInfoV2, ProviderReferenceV2};
use crate::error::{Result, StateError};
use crate::snapshot::{
    ConfigMap, CustomTimeouts, Manifest, PluginInfo, ProviderReference, ResourceRecord,
    ResourceStatus, Snapshot,
};
use fleetform_resource::{PropertyMap, Urn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointV3 {
    pub stack: String,
    pub config: ConfigMap,
    pub manifest: ManifestV2,
    pub resources: Vec<ResourceV3>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomTimeoutsV3 {
    pub create: Option<u64>,
    pub update: Option<u64>,
    pub delete: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusV3 {
    Created,
    PendingCreate,
    PendingDelete,
    External,
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceV3 {
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
    pub custom_timeouts: Option<CustomTimeoutsV3>,
    pub status: StatusV3,
}

impl From<ResourceStatus> for StatusV3 {
    fn from(status: ResourceStatus) -> Self {
        match status {
            ResourceStatus::Created => StatusV3::Created,
            ResourceStatus::PendingCreate => StatusV3::PendingCreate,
            ResourceStatus::PendingDelete => StatusV3::PendingDelete,
            ResourceStatus::External => StatusV3::External,
            ResourceStatus::Indeterminate => StatusV3::Indeterminate,
        }
    }
}

impl From<StatusV3> for ResourceStatus {
    fn from(status: StatusV3) -> Self {
        match status {
            StatusV3::Created => ResourceStatus::Created,
            StatusV3::PendingCreate => ResourceStatus::PendingCreate,
            StatusV3::PendingDelete => ResourceStatus::PendingDelete,
            StatusV3::External => ResourceStatus::External,
            StatusV3::Indeterminate => ResourceStatus::Indeterminate,
        }
    }
}

impl From<&ResourceRecord> for ResourceV3 {
    fn from(record: &ResourceRecord) -> Self {
        Self {
            urn: record.urn.clone(),
            type_token: record.type_token.clone(),
            id: record.id.clone(),
            inputs: record.inputs.clone(),
            outputs: record.outputs.clone(),
            parent: record.parent.clone(),
            dependencies: record.dependencies.iter().cloned().collect(),
            protect: record.protect,
            provider: record.provider.as_ref().map(|p| ProviderReferenceV2 {
                package: p.package.clone(),
                config: p.config.clone(),
            }),
            custom_timeouts: record.custom_timeouts.map(|t| CustomTimeoutsV3 {
                create: t.create,
                update: t.update,
                delete: t.delete,
            }),
            status: record.status.into(),
        }
    }
}

impl From<ResourceV3> for ResourceRecord {
    fn from(resource: ResourceV3) -> Self {
        Self {
            urn: resource.urn,
            type_token: resource.type_token,
            id: resource.id,
            inputs: resource.inputs,
            outputs: resource.outputs,
            parent: resource.parent,
            dependencies: resource.dependencies.into_iter().collect(),
            protect: resource.protect,
            provider: resource
                .provider
                .map(|p| ProviderReference::new(p.package, p.config)),
            custom_timeouts: resource.custom_timeouts.map(|t| CustomTimeouts {
                create: t.create,
                update: t.update,
                delete: t.delete,
            }),
            status: resource.status.into(),
        }
    }
}

impl From<&Snapshot> for CheckpointV3 {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            stack: snapshot.stack.clone(),
            config: snapshot.config.clone(),
            manifest: ManifestV2 {
                time: snapshot.manifest.time,
                version: snapshot.manifest.version.clone(),
                plugins: snapshot
                    .manifest
                    .plugins
                    .iter()
                    .map(|p| PluginInfoV2 {
                        name: p.name.clone(),
                        version: p.version.clone(),
                    })
                    .collect(),
            },
            resources: snapshot.resources().iter().map(ResourceV3::from).collect(),
        }
    }
}

impl TryFrom<CheckpointV3> for Snapshot {
    type Error = StateError;

    fn try_from(checkpoint: CheckpointV3) -> Result<Self> {
        let manifest = Manifest {
            time: checkpoint.manifest.time,
            version: checkpoint.manifest.version,
            plugins: checkpoint
                .manifest
                .plugins
                .into_iter()
                .map(|p| PluginInfo {
                    name: p.name,
                    version: p.version,
                })
                .collect(),
        };
        Snapshot::from_parts(
            checkpoint.stack,
            checkpoint.config,
            manifest,
            checkpoint.resources.into_iter().map(ResourceRecord::from).collect(),
        )
    }
}
