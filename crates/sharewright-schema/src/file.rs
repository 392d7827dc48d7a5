use crate::share::{Protocol, ShareDefinition};
use crate::types::ShareName;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk TOML form of a share request.
///
/// `path` may be omitted for NFS, where it defaults to the export path given
/// as `name`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ShareFile {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub read_only: bool,
    /// Defaults to `true` for NFS (squash to the anonymous user), `false` otherwise.
    #[serde(default)]
    pub guest_allowed: Option<bool>,
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
    #[serde(default)]
    pub valid_users: Vec<String>,
}

fn default_browseable() -> bool {
    true
}

impl ShareFile {
    /// Resolve defaults and validate, producing a normalized definition.
    pub fn into_definition(self) -> Result<ShareDefinition, SchemaError> {
        let name = self.name.trim().to_owned();
        let path = match (self.path, self.protocol) {
            (Some(p), _) => p,
            (None, Protocol::Nfs) => PathBuf::from(&name),
            (None, _) => {
                return Err(SchemaError::InvalidPath {
                    path: String::new(),
                    reason: format!("path is required for {} shares", self.protocol),
                })
            }
        };

        ShareDefinition {
            name: ShareName::new(name),
            protocol: self.protocol,
            path,
            read_only: self.read_only,
            guest_allowed: self
                .guest_allowed
                .unwrap_or(self.protocol == Protocol::Nfs),
            allowed_clients: self.allowed_clients,
            create_mask: self.create_mask,
            directory_mask: self.directory_mask,
            browseable: self.browseable,
            force_user: self.force_user,
            force_group: self.force_group,
            valid_users: self.valid_users,
        }
        .normalize()
    }
}

pub fn parse_share_str(input: &str) -> Result<ShareDefinition, SchemaError> {
    let file: ShareFile = toml::from_str(input)?;
    file.into_definition()
}

pub fn parse_share_file(path: impl AsRef<Path>) -> Result<ShareDefinition, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_share_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_smb_share() {
        let input = r#"
name = "docs"
protocol = "smb"
path = "/mnt/shares/docs"
guest_allowed = true
create_mask = "0664"
directory_mask = "0775"
valid_users = ["alice", "@staff"]
"#;
        let def = parse_share_str(input).expect("should parse");
        assert_eq!(def.name, "docs");
        assert_eq!(def.protocol, Protocol::Smb);
        assert!(def.guest_allowed);
        assert!(!def.read_only);
        assert!(def.browseable);
        assert_eq!(def.create_mask.as_deref(), Some("0664"));
        assert_eq!(def.valid_users, vec!["alice", "@staff"]);
    }

    #[test]
    fn nfs_path_defaults_to_name() {
        let input = r#"
name = "/mnt/shares/backup"
protocol = "nfs"
read_only = true
allowed_clients = ["192.168.1.0/24"]
"#;
        let def = parse_share_str(input).expect("should parse");
        assert_eq!(def.path, PathBuf::from("/mnt/shares/backup"));
        assert_eq!(def.allowed_clients, vec!["192.168.1.0/24"]);
        assert!(def.guest_allowed, "NFS squashes to the anonymous user by default");
    }

    #[test]
    fn smb_requires_path() {
        let input = r#"
name = "docs"
protocol = "smb"
"#;
        assert!(matches!(
            parse_share_str(input),
            Err(SchemaError::InvalidPath { .. })
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
name = "docs"
protocol = "smb"
path = "/srv/docs"
comment = "not supported"
"#;
        assert!(matches!(
            parse_share_str(input),
            Err(SchemaError::ParseToml(_))
        ));
    }

    #[test]
    fn rejects_reserved_name() {
        let input = r#"
name = "homes"
protocol = "smb"
path = "/home"
"#;
        assert!(matches!(
            parse_share_str(input),
            Err(SchemaError::ReservedName { .. })
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.toml");
        fs::write(
            &path,
            "name = \"alice\"\nprotocol = \"ftp\"\npath = \"/srv/ftp/alice\"\n",
        )
        .unwrap();
        let def = parse_share_file(&path).unwrap();
        assert_eq!(def.protocol, Protocol::Ftp);
        assert_eq!(def.path, PathBuf::from("/srv/ftp/alice"));
    }
}
