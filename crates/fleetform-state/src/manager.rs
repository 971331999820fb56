//! Durable stack state
//!
//! Each stack's checkpoint lives at `<state_dir>/stacks/<stack>.json`, with
//! the previous checkpoint kept as `<stack>.json.bak` and the stack lease at
//! `<stack>.lock`.

use crate::error::{Result, StateError};
use crate::migrate::{read_snapshot, write_checkpoint_at};
use crate::snapshot::Snapshot;
use crate::versions::CURRENT_VERSION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STACKS_DIR: &str = "stacks";
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Where a deployment writes its snapshot after every resource-level mutation
#[async_trait]
pub trait SnapshotPersister: Send + Sync {
    async fn persist(&self, snapshot: &Snapshot) -> Result<()>;
}

/// State manager for reading/writing stack checkpoints
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
    stale_after: Duration,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Age after which another holder's lease may be taken over
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn stacks_dir(&self) -> PathBuf {
        self.state_dir.join(STACKS_DIR)
    }

    pub fn state_path(&self, stack: &str) -> PathBuf {
        self.stacks_dir().join(format!("{}.json", stack))
    }

    pub fn backup_path(&self, stack: &str) -> PathBuf {
        self.stacks_dir().join(format!("{}.json.bak", stack))
    }

    fn temp_path(&self, stack: &str) -> PathBuf {
        self.stacks_dir().join(format!("{}.json.tmp", stack))
    }

    fn lock_path(&self, stack: &str) -> PathBuf {
        self.stacks_dir().join(format!("{}.lock", stack))
    }

    async fn ensure_stacks_dir(&self) -> Result<()> {
        let dir = self.stacks_dir();
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Stacks with a checkpoint on disk
    pub async fn list_stacks(&self) -> Result<Vec<String>> {
        let dir = self.stacks_dir();
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut stacks = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stack) = name.strip_suffix(".json") {
                stacks.push(stack.to_string());
            }
        }
        stacks.sort();
        Ok(stacks)
    }

    /// Load a point-in-time copy of a stack's snapshot; empty for a first deploy
    pub async fn load(&self, stack: &str) -> Result<Snapshot> {
        let path = self.state_path(stack);
        if !fs::try_exists(&path).await? {
            tracing::debug!("No checkpoint for stack {}, starting empty", stack);
            return Ok(Snapshot::new(stack));
        }

        let content = fs::read_to_string(&path).await?;
        let snapshot = read_snapshot(&content)?;
        if snapshot.stack != stack {
            return Err(StateError::Decode(format!(
                "{} holds the checkpoint of stack '{}'",
                path.display(),
                snapshot.stack
            )));
        }

        tracing::debug!(
            "Loaded stack {} with {} resources",
            stack,
            snapshot.len()
        );
        Ok(snapshot)
    }

    /// Load the previous checkpoint kept as backup
    pub async fn load_backup(&self, stack: &str) -> Result<Option<Snapshot>> {
        let path = self.backup_path(stack);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(read_snapshot(&content)?))
    }

    /// Save the snapshot
    ///
    /// The new checkpoint is written and synced to a temp file first. The
    /// current checkpoint is copied to the backup and only then replaced, so
    /// the backup survives until the new checkpoint is durable.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_stacks_dir().await?;

        let stack = snapshot.stack.as_str();
        let path = self.state_path(stack);
        let temp = self.temp_path(stack);
        let content = write_checkpoint_at(snapshot, CURRENT_VERSION)?;

        let mut file = fs::File::create(&temp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        match fs::copy(&path, self.backup_path(stack)).await {
            Ok(_) => {}
            // First save of the stack
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            "Saved stack {} with {} resources",
            stack,
            snapshot.len()
        );
        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Current lease holder, if any
    pub async fn lock_info(&self, stack: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(stack);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Acquire the stack lease for exclusive write access
    pub async fn acquire_lock(&self, stack: &str) -> Result<StateLock> {
        self.ensure_stacks_dir().await?;
        let lock_path = self.lock_path(stack);

        if let Some(info) = self.lock_info(stack).await? {
            if !info.is_stale(self.stale_after) {
                return Err(StateError::Lock(format!(
                    "Stack {} is locked by {} (pid {}) since {}",
                    stack, info.holder, info.pid, info.acquired_at
                )));
            }
            tracing::warn!("Removing stale lock of stack {} from {}", stack, info.holder);
            fs::remove_file(&lock_path).await?;
        }

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StateError::Lock(format!(
                    "Stack {} was locked concurrently",
                    stack
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())
            .await?;
        file.sync_all().await?;

        tracing::debug!("Acquired lock for stack {}", stack);
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }

    /// Remove a lease regardless of its holder; true if one existed
    pub async fn force_unlock(&self, stack: &str) -> Result<bool> {
        let path = self.lock_path(stack);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        tracing::warn!("Force-removed lock of stack {}", stack);
        Ok(true)
    }
}

#[async_trait]
impl SnapshotPersister for StateManager {
    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        self.save(snapshot).await
    }
}

/// Lease information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    /// Held for at least `stale_after`; a lease from the future is never stale
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .to_std()
            .is_ok_and(|age| age >= stale_after)
    }
}

/// RAII guard for a stack lease
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lease
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if fs::try_exists(&self.lock_path).await? {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released lock {}", self.lock_path.display());
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // No async in drop
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
