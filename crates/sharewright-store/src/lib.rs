//! Durable side effects of Sharewright: config files, their backups, and the
//! crash-recovery journal.
//!
//! `ConfigStore` replaces a daemon config file atomically, `BackupManager`
//! keeps immutable timestamped copies taken before every mutation, and
//! `Journal` records what an in-flight reconciliation has to undo if the
//! process dies halfway. `StateLayout` owns the state directory holding the
//! journal and the per-protocol lock files.

pub mod backup;
pub mod config;
pub mod journal;
pub mod layout;

pub use backup::{BackupManager, BackupSnapshot};
pub use config::ConfigStore;
pub use journal::{Journal, JournalEntry, JournalOp, RollbackStep};
pub use layout::{StateLayout, STATE_FORMAT_VERSION};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not promise that a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("backup {} is corrupt: expected checksum {expected}, got {actual}", path.display())]
    IntegrityFailure {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no free backup name for {}", .0.display())]
    BackupNameExhausted(PathBuf),
}
