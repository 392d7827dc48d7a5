//! Share definitions and validation for Sharewright.
//!
//! This crate defines the desired-state layer: the `ShareDefinition` a caller
//! hands to the reconciliation engine, the `Protocol` it targets, structural
//! validation (names, reserved words, paths, masks, NFS client specs), and
//! parsing of TOML share files into normalized definitions.

pub mod file;
pub mod share;
pub mod types;
pub mod validate;

pub use file::{parse_share_file, parse_share_str, ShareFile};
pub use share::{Protocol, ShareDefinition, NFS_WILDCARD_CLIENT};
pub use types::ShareName;
pub use validate::{
    validate_client_spec, validate_mask, validate_name, validate_path, validate_principal,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid share name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("'{name}' is a reserved {}", reserved_kind(.protocol))]
    ReservedName { protocol: Protocol, name: String },
    #[error("invalid share path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid {field} '{value}': expected 3-4 octal digits")]
    InvalidMask { field: &'static str, value: String },
    #[error("invalid client spec '{0}'")]
    InvalidClient(String),
    #[error("invalid principal '{0}'")]
    InvalidPrincipal(String),
    #[error("unknown protocol '{0}', expected smb, nfs or ftp")]
    UnknownProtocol(String),
    #[error("failed to read share file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse share file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn reserved_kind(protocol: &Protocol) -> &'static str {
    match protocol {
        Protocol::Smb => "smb section name",
        Protocol::Nfs => "nfs export path",
        Protocol::Ftp => "account name for ftp shares",
    }
}
