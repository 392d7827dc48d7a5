use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// One daemon config file, replaced atomically.
///
/// A write goes to a temp file in the same directory, is fsynced, takes over
/// the permission bits and ownership of the file it replaces, and is renamed
/// over the target. A failed write leaves the original untouched.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(self.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read as text; a missing file is an empty document.
    pub fn read_or_empty(&self) -> Result<String, StoreError> {
        match self.read() {
            Ok(bytes) => Ok(String::from_utf8(bytes)
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?),
            Err(StoreError::NotFound(_)) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, data: &[u8]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let existing = match fs::metadata(&self.path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        if let Some(meta) = &existing {
            tmp.as_file().set_permissions(meta.permissions())?;
            if let Err(e) =
                std::os::unix::fs::fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid()))
            {
                debug!("keeping temp file owner for {}: {e}", self.path.display());
            }
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        debug!("wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }

    /// Delete the file. Removing an absent file is not an error.
    pub fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                if let Some(dir) = self.path.parent() {
                    fsync_dir(dir)?;
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
