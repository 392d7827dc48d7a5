use crate::types::ShareName;
use crate::validate::{
    validate_client_spec, validate_mask, validate_name, validate_path, validate_principal,
};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Client spec used when an NFS share lists no clients.
pub const NFS_WILDCARD_CLIENT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Smb,
    Nfs,
    Ftp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Smb, Protocol::Nfs, Protocol::Ftp];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Smb => "smb",
            Protocol::Nfs => "nfs",
            Protocol::Ftp => "ftp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smb" | "cifs" | "samba" => Ok(Protocol::Smb),
            "nfs" => Ok(Protocol::Nfs),
            "ftp" | "vsftpd" => Ok(Protocol::Ftp),
            other => Err(SchemaError::UnknownProtocol(other.to_owned())),
        }
    }
}

/// Desired state of one share, as handed to the reconciliation engine.
///
/// Protocol-specific fields are ignored by the renderers of other protocols;
/// [`normalize`](Self::normalize) resets them so that a normalized definition
/// survives a render/parse round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareDefinition {
    pub name: ShareName,
    pub protocol: Protocol,
    pub path: PathBuf,
    pub read_only: bool,
    /// SMB/FTP guest access. For NFS: squash all clients to the anonymous user.
    pub guest_allowed: bool,
    /// NFS client specs, in order.
    #[serde(default)]
    pub allowed_clients: Vec<String>,
    #[serde(default)]
    pub create_mask: Option<String>,
    #[serde(default)]
    pub directory_mask: Option<String>,
    #[serde(default = "default_browseable")]
    pub browseable: bool,
    #[serde(default)]
    pub force_user: Option<String>,
    #[serde(default)]
    pub force_group: Option<String>,
    /// SMB principals the share is visible to. Empty means unrestricted.
    #[serde(default)]
    pub valid_users: Vec<String>,
}

fn default_browseable() -> bool {
    true
}

impl ShareDefinition {
    pub fn new(protocol: Protocol, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: ShareName::new(name),
            protocol,
            path: path.into(),
            read_only: false,
            guest_allowed: false,
            allowed_clients: Vec::new(),
            create_mask: None,
            directory_mask: None,
            browseable: true,
            force_user: None,
            force_group: None,
            valid_users: Vec::new(),
        }
    }

    /// An NFS export; its name is the export path. Clients are squashed to
    /// the anonymous user unless `guest_allowed` is cleared.
    pub fn nfs_export(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut share = Self::new(Protocol::Nfs, path.to_string_lossy(), path);
        share.guest_allowed = true;
        share
    }

    /// Validate every field and return the canonical form.
    ///
    /// Fields that do not apply to the protocol are reset to their defaults,
    /// NFS client lists are deduplicated (first occurrence wins) and an empty
    /// NFS client list becomes `*`.
    pub fn normalize(&self) -> Result<ShareDefinition, SchemaError> {
        validate_name(self.protocol, &self.name)?;
        validate_path(&self.path)?;

        let mut out = self.clone();
        match self.protocol {
            Protocol::Smb => {
                if let Some(mask) = &self.create_mask {
                    validate_mask("create mask", mask)?;
                }
                if let Some(mask) = &self.directory_mask {
                    validate_mask("directory mask", mask)?;
                }
                for principal in self
                    .force_user
                    .iter()
                    .chain(self.force_group.iter())
                    .chain(self.valid_users.iter())
                {
                    validate_principal(principal)?;
                }
                out.allowed_clients.clear();
                out.valid_users = dedup_preserving_order(&self.valid_users);
            }
            Protocol::Nfs => {
                if self.name.as_str() != self.path.to_string_lossy() {
                    return Err(SchemaError::InvalidName {
                        name: self.name.to_string(),
                        reason: format!(
                            "an NFS share is named by its export path '{}'",
                            self.path.display()
                        ),
                    });
                }
                for client in &self.allowed_clients {
                    validate_client_spec(client)?;
                }
                out.allowed_clients = dedup_preserving_order(&self.allowed_clients);
                if out.allowed_clients.is_empty() {
                    out.allowed_clients.push(NFS_WILDCARD_CLIENT.to_owned());
                }
                out.reset_smb_fields();
            }
            Protocol::Ftp => {
                out.allowed_clients.clear();
                out.reset_smb_fields();
            }
        }
        Ok(out)
    }

    fn reset_smb_fields(&mut self) {
        self.create_mask = None;
        self.directory_mask = None;
        self.browseable = true;
        self.force_user = None;
        self.force_group = None;
        self.valid_users.clear();
    }
}

fn dedup_preserving_order(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !out.iter().any(|v| v == trimmed) {
            out.push(trimmed.to_owned());
        }
    }
    out
}
