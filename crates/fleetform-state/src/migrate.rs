//! Checkpoint migration engine
//!
//! Migration steps exist only between adjacent schema versions. The
//! [`Migrator`] keeps them in an arena indexed by source version and composes
//! them for any `from → to`. Every step is pure: no I/O, no clock, no
//! reordering or dropping of resources, and `stack`/`config` pass through
//! untouched.
//!
//! Lossy directions, all on downgrade:
//!
//! | Step   | Dropped / mapped                                                   |
//! |--------|--------------------------------------------------------------------|
//! | V2→V1  | manifest plugins and provider references are dropped; `pending_create` and `external` become `delete = false` |
//! | V3→V2  | custom timeouts are dropped; `indeterminate` becomes `pending_create` so the older engine still reconciles it |

use crate::error::{Result, StateError};
use crate::snapshot::Snapshot;
use crate::versions::{
    CURRENT_VERSION, CheckpointV1, CheckpointV2, CheckpointV3, ManifestV1, ManifestV2, ResourceV1,
    ResourceV2, ResourceV3, StatusV2, StatusV3, VersionedCheckpoint,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

type StepFn = fn(VersionedCheckpoint) -> Result<VersionedCheckpoint>;

/// Upgrade and downgrade between `from` and `from + 1`
struct MigrationStep {
    from: u32,
    upgrade: StepFn,
    downgrade: StepFn,
}

pub struct Migrator {
    steps: Vec<MigrationStep>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    pub fn new() -> Self {
        let steps = vec![
            MigrationStep {
                from: 1,
                upgrade: |c| match c {
                    VersionedCheckpoint::V1(v1) => Ok(VersionedCheckpoint::V2(upgrade_v1_to_v2(v1))),
                    other => Err(mismatch(1, &other)),
                },
                downgrade: |c| match c {
                    VersionedCheckpoint::V2(v2) => {
                        Ok(VersionedCheckpoint::V1(downgrade_v2_to_v1(v2)))
                    }
                    other => Err(mismatch(2, &other)),
                },
            },
            MigrationStep {
                from: 2,
                upgrade: |c| match c {
                    VersionedCheckpoint::V2(v2) => Ok(VersionedCheckpoint::V3(upgrade_v2_to_v3(v2))),
                    other => Err(mismatch(2, &other)),
                },
                downgrade: |c| match c {
                    VersionedCheckpoint::V3(v3) => {
                        Ok(VersionedCheckpoint::V2(downgrade_v3_to_v2(v3)))
                    }
                    other => Err(mismatch(3, &other)),
                },
            },
        ];
        debug_assert!(steps.iter().enumerate().all(|(i, s)| s.from == i as u32 + 1));
        Self { steps }
    }

    /// Newest version reachable through the arena
    pub fn latest(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    fn step(&self, from: u32) -> Result<&MigrationStep> {
        self.steps
            .get(from.wrapping_sub(1) as usize)
            .ok_or(StateError::UnsupportedVersion {
                found: from,
                supported: self.latest(),
            })
    }

    /// Migrate to `to` by composing adjacent steps in order
    pub fn migrate(&self, checkpoint: VersionedCheckpoint, to: u32) -> Result<VersionedCheckpoint> {
        if to == 0 || to > self.latest() {
            return Err(StateError::UnsupportedVersion {
                found: to,
                supported: self.latest(),
            });
        }

        let mut current = checkpoint;
        while current.version() < to {
            let from = current.version();
            current = (self.step(from)?.upgrade)(current)?;
            tracing::debug!("Upgraded checkpoint v{} -> v{}", from, from + 1);
        }
        while current.version() > to {
            let from = current.version();
            current = (self.step(from - 1)?.downgrade)(current)?;
            tracing::debug!("Downgraded checkpoint v{} -> v{}", from, from - 1);
        }
        Ok(current)
    }
}

fn mismatch(expected: u32, found: &VersionedCheckpoint) -> StateError {
    StateError::Decode(format!(
        "migration step expected a v{} checkpoint, got v{}",
        expected,
        found.version()
    ))
}

pub fn upgrade_v1_to_v2(v1: CheckpointV1) -> CheckpointV2 {
    CheckpointV2 {
        stack: v1.stack,
        config: v1.config,
        manifest: ManifestV2 {
            time: v1.manifest.time,
            version: v1.manifest.version,
            plugins: Vec::new(),
        },
        resources: v1
            .resources
            .into_iter()
            .map(|r| ResourceV2 {
                urn: r.urn,
                type_token: r.type_token,
                id: r.id,
                inputs: r.inputs,
                outputs: r.outputs,
                parent: r.parent,
                dependencies: r.dependencies,
                protect: r.protect,
                provider: None,
                status: if r.delete {
                    StatusV2::PendingDelete
                } else {
                    StatusV2::Created
                },
            })
            .collect(),
    }
}

pub fn downgrade_v2_to_v1(v2: CheckpointV2) -> CheckpointV1 {
    CheckpointV1 {
        stack: v2.stack,
        config: v2.config,
        manifest: ManifestV1 {
            time: v2.manifest.time,
            version: v2.manifest.version,
        },
        resources: v2
            .resources
            .into_iter()
            .map(|r| ResourceV1 {
                urn: r.urn,
                type_token: r.type_token,
                id: r.id,
                inputs: r.inputs,
                outputs: r.outputs,
                parent: r.parent,
                dependencies: r.dependencies,
                protect: r.protect,
                delete: r.status == StatusV2::PendingDelete,
            })
            .collect(),
    }
}

pub fn upgrade_v2_to_v3(v2: CheckpointV2) -> CheckpointV3 {
    CheckpointV3 {
        stack: v2.stack,
        config: v2.config,
        manifest: v2.manifest,
        resources: v2
            .resources
            .into_iter()
            .map(|r| ResourceV3 {
                urn: r.urn,
                type_token: r.type_token,
                id: r.id,
                inputs: r.inputs,
                outputs: r.outputs,
                parent: r.parent,
                dependencies: r.dependencies,
                protect: r.protect,
                provider: r.provider,
                custom_timeouts: None,
                status: match r.status {
                    StatusV2::Created => StatusV3::Created,
                    StatusV2::PendingCreate => StatusV3::PendingCreate,
                    StatusV2::PendingDelete => StatusV3::PendingDelete,
                    StatusV2::External => StatusV3::External,
                },
            })
            .collect(),
    }
}

pub fn downgrade_v3_to_v2(v3: CheckpointV3) -> CheckpointV2 {
    CheckpointV2 {
        stack: v3.stack,
        config: v3.config,
        manifest: v3.manifest,
        resources: v3
            .resources
            .into_iter()
            .map(|r| ResourceV2 {
                urn: r.urn,
                type_token: r.type_token,
                id: r.id,
                inputs: r.inputs,
                outputs: r.outputs,
                parent: r.parent,
                dependencies: r.dependencies,
                protect: r.protect,
                provider: r.provider,
                status: match r.status {
                    StatusV3::Created => StatusV2::Created,
                    StatusV3::PendingCreate | StatusV3::Indeterminate => StatusV2::PendingCreate,
                    StatusV3::PendingDelete => StatusV2::PendingDelete,
                    StatusV3::External => StatusV2::External,
                },
            })
            .collect(),
    }
}

/// On-disk wrapper recording the schema version of its body
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    version: u32,
    checkpoint: Value,
}

/// Decode a checkpoint document at whatever version it was written
pub fn decode_checkpoint(text: &str) -> Result<VersionedCheckpoint> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| StateError::Decode(format!("checkpoint envelope: {}", e)))?;
    VersionedCheckpoint::decode(envelope.version, envelope.checkpoint)
}

pub fn encode_checkpoint(checkpoint: &VersionedCheckpoint) -> Result<String> {
    let envelope = Envelope {
        version: checkpoint.version(),
        checkpoint: checkpoint.encode()?,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Decode any supported version and bring it up to the current schema
pub fn read_snapshot(text: &str) -> Result<Snapshot> {
    let decoded = decode_checkpoint(text)?;
    let version = decoded.version();
    match Migrator::new().migrate(decoded, CURRENT_VERSION)? {
        VersionedCheckpoint::V3(v3) => {
            if version < CURRENT_VERSION {
                tracing::info!(
                    "Migrated checkpoint for stack {} from v{} to v{}",
                    v3.stack,
                    version,
                    CURRENT_VERSION
                );
            }
            Snapshot::try_from(v3)
        }
        other => Err(mismatch(CURRENT_VERSION, &other)),
    }
}

/// Encode `snapshot` at an older (or the current) schema version
pub fn write_checkpoint_at(snapshot: &Snapshot, version: u32) -> Result<String> {
    let current = VersionedCheckpoint::V3(CheckpointV3::from(snapshot));
    let target = Migrator::new().migrate(current, version)?;
    encode_checkpoint(&target)
}

/// Rewrite a checkpoint document at another schema version
pub fn migrate_document(text: &str, to: u32) -> Result<String> {
    let decoded = decode_checkpoint(text)?;
    let migrated = Migrator::new().migrate(decoded, to)?;
    encode_checkpoint(&migrated)
}
