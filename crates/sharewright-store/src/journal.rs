use crate::backup::BackupSnapshot;
use crate::layout::StateLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use sharewright_schema::Protocol;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A single step that undoes part of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackStep {
    /// Put the config file back as it was before the operation.
    RestoreSnapshot(BackupSnapshot),
    /// Remove a share directory the operation created.
    RemoveDir(PathBuf),
    /// Remove an OS account the operation created.
    RemoveAccount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOp {
    Apply,
    Remove,
}

impl std::fmt::Display for JournalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalOp::Apply => write!(f, "apply"),
            JournalOp::Remove => write!(f, "remove"),
        }
    }
}

/// An in-flight reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op_id: String,
    pub kind: JournalOp,
    pub protocol: Protocol,
    pub share: String,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Crash-recovery journal.
///
/// An entry is written before the first mutation, grows a rollback step per
/// side effect, and is removed once the operation reaches a terminal state.
/// Entries still present on startup belong to operations that died halfway;
/// the engine replays their rollback steps in reverse.
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            dir: layout.journal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Begin a new entry. Returns its op_id.
    pub fn begin(
        &self,
        kind: JournalOp,
        protocol: Protocol,
        share: &str,
    ) -> Result<String, StoreError> {
        let op_id = format!(
            "{}-{}-{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            protocol,
            &blake3::hash(share.as_bytes()).to_hex()[..8],
            SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let entry = JournalEntry {
            op_id: op_id.clone(),
            kind,
            protocol,
            share: share.to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("journal begin: {kind} {protocol} {share} (op_id={op_id})");
        Ok(op_id)
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Remove an entry once its operation is terminal.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    /// All incomplete entries, oldest first. Unreadable entries are dropped.
    pub fn list_incomplete(&self) -> Result<Vec<JournalEntry>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<JournalEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("corrupt journal entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => {
                    warn!("unreadable journal entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.op_id.cmp(&b.op_id)));
        Ok(entries)
    }

    /// Incomplete entries for one protocol, oldest first.
    pub fn incomplete_for(&self, protocol: Protocol) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self
            .list_incomplete()?
            .into_iter()
            .filter(|e| e.protocol == protocol)
            .collect())
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&self.dir)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<JournalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}
