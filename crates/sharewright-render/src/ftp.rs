//! vsftpd allow-list entries.
//!
//! The allow-list (`userlist_file` with `userlist_deny=NO`) holds one account
//! name per line. Each managed entry is preceded by a marker comment that
//! carries the rest of the share definition:
//!
//! ```text
//! # share:alice write_enable=YES guest_enable=NO local_root=/srv/ftp/alice
//! alice
//! ```
//!
//! `local_root` is always last and runs to the end of the line. Lines without
//! a marker belong to the operator: they are never removed and never linted
//! beyond duplicate detection, but an upsert for the same name adopts them.
//!
//! The marker only records the share. vsftpd reads the settings themselves
//! from a per-user file (`user_config_dir`), see [`AccountPlan::user_config`].

use crate::text::{is_blank, is_comment, lines_with_offsets};
use crate::{expect_protocol, ConfigFragment, RenderError, Renderer};
use serde::{Deserialize, Serialize};
use sharewright_schema::{validate_name, Protocol, ShareDefinition};
use std::ops::Range;
use std::path::PathBuf;
use tracing::{debug, warn};

const MARKER: &str = "# share:";

pub const UPLOAD_MODE: u32 = 0o777;
pub const READ_ONLY_UPLOAD_MODE: u32 = 0o555;
pub const DOWNLOAD_MODE: u32 = 0o755;

/// OS-level side effects an FTP share needs besides its allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPlan {
    pub username: String,
    pub home: PathBuf,
    pub upload_dir: PathBuf,
    pub upload_mode: u32,
    pub download_dir: PathBuf,
    pub download_mode: u32,
    pub read_only: bool,
    pub guest_allowed: bool,
    /// Contents of the vsftpd per-user config file for this account.
    pub user_config: String,
}

impl AccountPlan {
    pub fn for_share(share: &ShareDefinition) -> Self {
        let user_config = format!(
            "local_root={root}\nwrite_enable={write}\nguest_enable={guest}\n",
            root = share.path.display(),
            write = yes_no(!share.read_only),
            guest = yes_no(share.guest_allowed),
        );
        Self {
            username: share.name.to_string(),
            home: share.path.clone(),
            upload_dir: share.path.join("upload"),
            upload_mode: if share.read_only {
                READ_ONLY_UPLOAD_MODE
            } else {
                UPLOAD_MODE
            },
            download_dir: share.path.join("download"),
            download_mode: DOWNLOAD_MODE,
            read_only: share.read_only,
            guest_allowed: share.guest_allowed,
            user_config,
        }
    }
}

pub struct FtpRenderer;

#[derive(Debug)]
struct Marker<'a> {
    name: &'a str,
    write_enable: Option<&'a str>,
    guest_enable: Option<&'a str>,
    local_root: Option<&'a str>,
}

fn parse_marker(line: &str) -> Option<Marker<'_>> {
    let rest = line.trim().strip_prefix(MARKER)?;
    let (name, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
    let mut marker = Marker {
        name,
        write_enable: None,
        guest_enable: None,
        local_root: None,
    };

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(root) = rest.strip_prefix("local_root=") {
            marker.local_root = Some(root.trim_end());
            break;
        }
        let (pair, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        match pair.split_once('=') {
            Some(("write_enable", v)) => marker.write_enable = Some(v),
            Some(("guest_enable", v)) => marker.guest_enable = Some(v),
            _ => debug!("ignoring '{pair}' in ftp share marker for {name}"),
        }
        rest = tail;
    }
    Some(marker)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "YES"
    } else {
        "NO"
    }
}

fn parse_yes_no(value: Option<&str>, key: &str) -> Result<bool, String> {
    match value {
        Some(v) if v.eq_ignore_ascii_case("yes") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("no") => Ok(false),
        Some(v) => Err(format!("{key}={v} is not YES or NO")),
        None => Err(format!("{key} is missing")),
    }
}

#[derive(Debug)]
enum Entry<'a> {
    Marker {
        marker: Marker<'a>,
        number: usize,
        start: usize,
        end: usize,
    },
    Account {
        name: &'a str,
        number: usize,
        start: usize,
        end: usize,
    },
}

fn scan(document: &str) -> Vec<Entry<'_>> {
    let mut out = Vec::new();
    for (index, (start, line)) in lines_with_offsets(document).enumerate() {
        let number = index + 1;
        let end = start + line.len();
        if let Some(marker) = parse_marker(line) {
            out.push(Entry::Marker {
                marker,
                number,
                start,
                end,
            });
        } else if !is_blank(line) && !is_comment(line) {
            out.push(Entry::Account {
                name: line.trim(),
                number,
                start,
                end,
            });
        }
    }
    out
}

/// The account line directly following a marker, if it names the same account.
fn paired_account<'a>(entries: &[Entry<'a>], index: usize, end: usize) -> Option<&'a str> {
    match entries.get(index + 1) {
        Some(Entry::Account { name, start, .. }) if *start == end => Some(*name),
        _ => None,
    }
}

/// Byte range of the first entry for `name`: a marker plus its account line,
/// or with `unmanaged` also a bare account line.
fn locate_entry(document: &str, name: &str, unmanaged: bool) -> Option<Range<usize>> {
    let entries = scan(document);
    for (i, entry) in entries.iter().enumerate() {
        match entry {
            Entry::Marker {
                marker, start, end, ..
            } if marker.name == name => {
                let end = if paired_account(&entries, i, *end) == Some(name) {
                    match &entries[i + 1] {
                        Entry::Account { end, .. } | Entry::Marker { end, .. } => *end,
                    }
                } else {
                    *end
                };
                return Some(*start..end);
            }
            Entry::Account {
                name: account,
                start,
                end,
                ..
            } if unmanaged && *account == name => return Some(*start..*end),
            _ => {}
        }
    }
    None
}

impl Renderer for FtpRenderer {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn render(&self, share: &ShareDefinition) -> Result<ConfigFragment, RenderError> {
        let share = expect_protocol(Protocol::Ftp, share)?;
        let text = format!(
            "{MARKER}{name} write_enable={write} guest_enable={guest} local_root={root}\n{name}\n",
            name = share.name,
            write = yes_no(!share.read_only),
            guest = yes_no(share.guest_allowed),
            root = share.path.display(),
        );
        Ok(ConfigFragment {
            protocol: Protocol::Ftp,
            account: Some(AccountPlan::for_share(&share)),
            name: share.name,
            text,
        })
    }

    fn locate(&self, document: &str, name: &str) -> Option<Range<usize>> {
        locate_entry(document, name, false)
    }

    /// Like the default upsert, but an unmanaged line for the same account
    /// is taken over instead of being listed twice.
    fn upsert(&self, document: &str, fragment: &ConfigFragment) -> String {
        let Some(range) = locate_entry(document, &fragment.name, true) else {
            return self.append(document, fragment);
        };
        let head = &document[..range.start];
        let mut tail = document[range.end..].to_owned();
        while let Some(range) = locate_entry(&tail, &fragment.name, true) {
            tail = self.cut(&tail, range);
        }

        let mut out = String::with_capacity(head.len() + fragment.text.len() + tail.len());
        out.push_str(head);
        out.push_str(&fragment.text);
        out.push_str(&tail);
        out
    }

    fn parse(&self, document: &str) -> Result<Vec<ShareDefinition>, RenderError> {
        let entries = scan(document);
        let mut shares = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            let (marker, number, end) = match entry {
                Entry::Marker {
                    marker,
                    number,
                    end,
                    ..
                } => (marker, *number, *end),
                Entry::Account { name, number, .. } => {
                    let managed = i > 0
                        && matches!(&entries[i - 1], Entry::Marker { marker, .. } if marker.name == *name);
                    if !managed {
                        debug!("allow-list line {number}: '{name}' has no share marker");
                    }
                    continue;
                }
            };

            if paired_account(&entries, i, end) != Some(marker.name) {
                warn!(
                    "allow-list line {number}: share marker for '{}' is not followed by its account",
                    marker.name
                );
                continue;
            }

            let malformed = |reason: String| RenderError::Malformed {
                protocol: Protocol::Ftp,
                line: number,
                reason,
            };
            let writable = parse_yes_no(marker.write_enable, "write_enable").map_err(malformed)?;
            let guest = parse_yes_no(marker.guest_enable, "guest_enable").map_err(malformed)?;
            let root = marker
                .local_root
                .ok_or_else(|| malformed("local_root is missing".to_owned()))?;

            let mut share = ShareDefinition::new(Protocol::Ftp, marker.name, root);
            share.read_only = !writable;
            share.guest_allowed = guest;
            match share.normalize() {
                Ok(share) => shares.push(share),
                Err(e) => warn!("allow-list line {number}: skipping '{}': {e}", marker.name),
            }
        }
        Ok(shares)
    }

    fn lint(&self, document: &str) -> Vec<String> {
        let entries = scan(document);
        let mut findings = Vec::new();
        let mut seen: Vec<(&str, usize)> = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            match entry {
                Entry::Marker {
                    marker,
                    number,
                    end,
                    ..
                } => {
                    if let Err(e) = validate_name(Protocol::Ftp, marker.name) {
                        findings.push(format!("line {number}: {e}"));
                    }
                    if paired_account(&entries, i, *end) != Some(marker.name) {
                        findings.push(format!(
                            "line {number}: share marker for '{}' is not followed by its account",
                            marker.name
                        ));
                    }
                }
                Entry::Account { name, number, .. } => {
                    if let Some((_, first)) = seen.iter().find(|(n, _)| n == name) {
                        findings.push(format!(
                            "line {number}: account '{name}' is listed again (first at line {first})"
                        ));
                    } else {
                        seen.push((*name, *number));
                    }
                }
            }
        }
        findings
    }
}
