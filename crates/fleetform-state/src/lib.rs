//! fleetform stack state
//!
//! - [`Snapshot`]: the in-memory, topologically ordered record of a stack
//! - [`versions`]: frozen checkpoint schemas V1..V3
//! - [`migrate`]: adjacent upgrade/downgrade steps composed by the [`Migrator`]
//! - [`StateManager`]: durable checkpoints with backup and a per-stack lease
//!
//! ```text
//! <state_dir>/stacks/
//! ├── dev.json        {"version": 3, "checkpoint": {...}}
//! ├── dev.json.bak    previous checkpoint
//! └── dev.lock        lease held by the running deployment
//! ```

pub mod error;
pub mod manager;
pub mod migrate;
pub mod snapshot;
pub mod versions;

// Re-exports
pub use error::{Result, StateError};
pub use manager::{LockInfo, SnapshotPersister, StateLock, StateManager};
pub use migrate::{
    Migrator, decode_checkpoint, encode_checkpoint, migrate_document, read_snapshot,
    write_checkpoint_at,
};
pub use snapshot::{
    ConfigMap, ConfigValue, CustomTimeouts, Manifest, PluginInfo, ProviderReference,
    ResourceRecord, ResourceStatus, Snapshot,
};
pub use versions::{CURRENT_VERSION, VersionedCheckpoint};
