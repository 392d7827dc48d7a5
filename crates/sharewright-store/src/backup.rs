use crate::config::ConfigStore;
use crate::{fsync_dir, StoreError};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
const PRESENT_SUFFIX: &str = "bak";
/// Marks a snapshot of a config file that did not exist yet.
const ABSENT_SUFFIX: &str = "absent";
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Immutable copy of a config file taken before a mutating write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub source: PathBuf,
    pub backup_path: PathBuf,
    /// RFC 3339.
    pub taken_at: String,
    /// blake3 of the backed-up bytes.
    pub checksum: String,
    /// `false` when the source did not exist; restoring removes the source.
    pub existed: bool,
}

/// Takes, restores, lists and prunes config file backups.
///
/// Backups are named `<file>.<UTC timestamp>.bak` and live next to the
/// source unless a backup directory is configured. They are created with
/// `create_new`, so an existing backup is never overwritten.
#[derive(Debug, Clone, Default)]
pub struct BackupManager {
    backup_dir: Option<PathBuf>,
}

struct ParsedName {
    stamp: NaiveDateTime,
    seq: u32,
    existed: bool,
}

fn parse_backup_name(file_name: &str, prefix: &str) -> Option<ParsedName> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (stem, existed) = if let Some(stem) = rest.strip_suffix(&format!(".{PRESENT_SUFFIX}")) {
        (stem, true)
    } else {
        (rest.strip_suffix(&format!(".{ABSENT_SUFFIX}"))?, false)
    };
    let (stamp, seq) = match stem.split_once('-') {
        Some((stamp, seq)) => (stamp, seq.parse().ok()?),
        None => (stem, 0),
    };
    let stamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some(ParsedName {
        stamp,
        seq,
        existed,
    })
}

impl BackupManager {
    pub fn new(backup_dir: Option<PathBuf>) -> Self {
        Self { backup_dir }
    }

    fn dir_for(&self, source: &Path) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => match source.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }

    fn file_name(source: &Path) -> String {
        source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_owned())
    }

    /// Copy the current bytes of `source` into a new backup file.
    pub fn snapshot(&self, source: &Path) -> Result<BackupSnapshot, StoreError> {
        let (data, existed) = match ConfigStore::new(source).read() {
            Ok(data) => (data, true),
            Err(StoreError::NotFound(_)) => (Vec::new(), false),
            Err(e) => return Err(e),
        };

        let dir = self.dir_for(source);
        fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        let suffix = if existed { PRESENT_SUFFIX } else { ABSENT_SUFFIX };
        let base = Self::file_name(source);

        for seq in 0..MAX_NAME_ATTEMPTS {
            let name = if seq == 0 {
                format!("{base}.{stamp}.{suffix}")
            } else {
                format!("{base}.{stamp}-{seq}.{suffix}")
            };
            let backup_path = dir.join(name);
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&backup_path)
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&data)?;
            file.sync_all()?;
            fsync_dir(&dir)?;

            let snapshot = BackupSnapshot {
                source: source.to_path_buf(),
                backup_path,
                taken_at: now.to_rfc3339(),
                checksum: blake3::hash(&data).to_hex().to_string(),
                existed,
            };
            debug!(
                "backed up {} to {}",
                source.display(),
                snapshot.backup_path.display()
            );
            return Ok(snapshot);
        }
        Err(StoreError::BackupNameExhausted(source.to_path_buf()))
    }

    /// Put the snapshot's bytes back in place, verifying them first.
    pub fn restore(&self, snapshot: &BackupSnapshot) -> Result<(), StoreError> {
        let target = ConfigStore::new(&snapshot.source);
        if !snapshot.existed {
            target.remove()?;
            info!("restored {} (removed; it did not exist)", snapshot.source.display());
            return Ok(());
        }

        let data = match fs::read(&snapshot.backup_path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(snapshot.backup_path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let actual = blake3::hash(&data).to_hex().to_string();
        if actual != snapshot.checksum {
            return Err(StoreError::IntegrityFailure {
                path: snapshot.backup_path.clone(),
                expected: snapshot.checksum.clone(),
                actual,
            });
        }
        target.write(&data)?;
        info!(
            "restored {} from {}",
            snapshot.source.display(),
            snapshot.backup_path.display()
        );
        Ok(())
    }

    /// Snapshots of `source`, newest first.
    pub fn list(&self, source: &Path) -> Result<Vec<BackupSnapshot>, StoreError> {
        let dir = self.dir_for(source);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let prefix = Self::file_name(source);

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(parsed) = parse_backup_name(&name, &prefix) else {
                continue;
            };
            let path = entry.path();
            let data = fs::read(&path)?;
            found.push((
                parsed.stamp,
                parsed.seq,
                BackupSnapshot {
                    source: source.to_path_buf(),
                    backup_path: path,
                    taken_at: parsed.stamp.and_utc().to_rfc3339(),
                    checksum: blake3::hash(&data).to_hex().to_string(),
                    existed: parsed.existed,
                },
            ));
        }

        found.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(found.into_iter().map(|(_, _, s)| s).collect())
    }

    /// Delete all but the newest `keep` snapshots of `source`. Returns the
    /// removed snapshots.
    pub fn prune(&self, source: &Path, keep: usize) -> Result<Vec<BackupSnapshot>, StoreError> {
        let mut removed = Vec::new();
        for snapshot in self.list(source)?.into_iter().skip(keep) {
            match fs::remove_file(&snapshot.backup_path) {
                Ok(()) => removed.push(snapshot),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !removed.is_empty() {
            info!(
                "pruned {} backup(s) of {}",
                removed.len(),
                source.display()
            );
        }
        Ok(removed)
    }
}
