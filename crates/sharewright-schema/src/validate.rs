//! Structural checks run before any filesystem access.

use crate::share::Protocol;
use crate::SchemaError;
use std::net::IpAddr;
use std::path::{Component, Path};

const SMB_RESERVED: &[&str] = &["global", "homes", "printers"];
const FTP_RESERVED: &[&str] = &["root", "nobody", "ftp"];

pub fn validate_name(protocol: Protocol, name: &str) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };

    match protocol {
        Protocol::Nfs => {
            validate_path(Path::new(name))
                .map_err(|_| invalid("an NFS share name must be its absolute export path"))?;
        }
        Protocol::Smb => {
            if name.is_empty() || name.len() > 64 {
                return Err(invalid("must be 1-64 characters"));
            }
            if !name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
            {
                return Err(invalid("must match [a-zA-Z0-9_-]"));
            }
            if SMB_RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                return Err(SchemaError::ReservedName {
                    protocol,
                    name: name.to_owned(),
                });
            }
        }
        Protocol::Ftp => {
            if name.is_empty() || name.len() > 32 {
                return Err(invalid("must be 1-32 characters"));
            }
            let mut bytes = name.bytes();
            let first_ok = bytes
                .next()
                .is_some_and(|b| b.is_ascii_lowercase() || b == b'_');
            if !first_ok
                || !bytes.all(|b| {
                    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-'
                })
            {
                return Err(invalid(
                    "an FTP share is an OS account and must match [a-z_][a-z0-9_-]*",
                ));
            }
            if FTP_RESERVED.contains(&name) {
                return Err(SchemaError::ReservedName {
                    protocol,
                    name: name.to_owned(),
                });
            }
        }
    }
    Ok(())
}

pub fn validate_path(path: &Path) -> Result<(), SchemaError> {
    let display = path.to_string_lossy().into_owned();
    let invalid = |reason: &str| SchemaError::InvalidPath {
        path: display.clone(),
        reason: reason.to_owned(),
    };

    let Some(s) = path.to_str() else {
        return Err(invalid("must be valid UTF-8"));
    };
    if !path.is_absolute() {
        return Err(invalid("must be absolute"));
    }
    if s == "/" {
        return Err(invalid("must not be the filesystem root"));
    }
    if s.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if s.trim() != s {
        return Err(invalid("must not start or end with whitespace"));
    }
    // A trailing backslash continues the line in smb.conf and /etc/exports.
    if s.ends_with('\\') {
        return Err(invalid("must not end with '\\'"));
    }
    if s.chars().any(|c| c.is_control() || c == '"') {
        return Err(invalid("must not contain control characters or quotes"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(invalid("must not contain '.' or '..' components"));
    }
    Ok(())
}

pub fn validate_mask(field: &'static str, value: &str) -> Result<(), SchemaError> {
    let ok = (3..=4).contains(&value.len()) && value.bytes().all(|b| (b'0'..=b'7').contains(&b));
    if ok {
        Ok(())
    } else {
        Err(SchemaError::InvalidMask {
            field,
            value: value.to_owned(),
        })
    }
}

/// Accepts `*`, `@netgroup`, an IP address, a CIDR network (prefix length or
/// dotted netmask), a hostname, or a wildcard domain such as `*.example.com`.
pub fn validate_client_spec(spec: &str) -> Result<(), SchemaError> {
    let invalid = || SchemaError::InvalidClient(spec.to_owned());

    if spec == "*" {
        return Ok(());
    }
    if let Some(group) = spec.strip_prefix('@') {
        return if is_host_label_chars(group) && !group.contains('*') {
            Ok(())
        } else {
            Err(invalid())
        };
    }
    if let Some((addr, prefix)) = spec.split_once('/') {
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        return match prefix.parse::<u8>() {
            Ok(bits) if bits <= max => Ok(()),
            Ok(_) => Err(invalid()),
            Err(_) if addr.is_ipv4() && prefix.parse::<std::net::Ipv4Addr>().is_ok() => Ok(()),
            Err(_) => Err(invalid()),
        };
    }
    if spec.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if is_host_label_chars(spec) && !spec.starts_with('-') && !spec.starts_with('.') {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn is_host_label_chars(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'*' | b'?' | b'_'))
}

/// Samba principal: a user, or a group prefixed with `@`, `+` or `&`.
pub fn validate_principal(principal: &str) -> Result<(), SchemaError> {
    let body = principal.trim_start_matches(['@', '+', '&']);
    let ok = !body.is_empty()
        && body.len() <= 64
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'$' | b'\\'));
    if ok {
        Ok(())
    } else {
        Err(SchemaError::InvalidPrincipal(principal.to_owned()))
    }
}
