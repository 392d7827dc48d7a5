//! `smb.conf` sections.
//!
//! A share is a `[name]` header followed by `key = value` lines. Its byte
//! range runs from the header to the last parameter line before the next
//! header; comments and blank lines after that belong to whatever follows.

use crate::text::{is_blank, is_comment, lines_with_offsets};
use crate::{expect_protocol, ConfigFragment, RenderError, Renderer};
use sharewright_schema::{validate_name, Protocol, ShareDefinition};
use std::fmt::Write as _;
use std::ops::Range;
use std::path::PathBuf;
use tracing::{debug, warn};

const INDENT: &str = "   ";

/// Sections Samba treats specially; never reported as shares.
const SPECIAL_SECTIONS: &[&str] = &["global", "homes", "printers"];

pub struct SmbRenderer;

struct Section<'a> {
    name: &'a str,
    line: usize,
    start: usize,
    end: usize,
    params: Vec<(&'a str, &'a str)>,
}

struct Scan<'a> {
    sections: Vec<Section<'a>>,
    malformed_headers: Vec<usize>,
}

fn header_name(line: &str) -> Option<Result<&str, ()>> {
    let t = line.trim();
    let rest = t.strip_prefix('[')?;
    Some(match rest.find(']') {
        Some(close) => Ok(rest[..close].trim()),
        None => Err(()),
    })
}

fn scan(document: &str) -> Scan<'_> {
    let mut sections: Vec<Section<'_>> = Vec::new();
    let mut malformed_headers = Vec::new();

    for (index, (start, line)) in lines_with_offsets(document).enumerate() {
        match header_name(line) {
            Some(Ok(name)) => sections.push(Section {
                name,
                line: index + 1,
                start,
                end: start + line.len(),
                params: Vec::new(),
            }),
            Some(Err(())) => malformed_headers.push(index + 1),
            None => {
                if is_blank(line) || is_comment(line) {
                    continue;
                }
                let Some(section) = sections.last_mut() else {
                    continue;
                };
                section.end = start + line.len();
                if let Some((key, value)) = line.split_once('=') {
                    section.params.push((key.trim(), value.trim()));
                }
            }
        }
    }

    Scan {
        sections,
        malformed_headers,
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

/// Samba parameter names ignore case and whitespace.
fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn share_from_section(section: &Section<'_>) -> Result<ShareDefinition, String> {
    validate_name(Protocol::Smb, section.name).map_err(|e| e.to_string())?;

    let mut share = ShareDefinition::new(Protocol::Smb, section.name, "");
    // Samba's default when the section does not say otherwise.
    share.read_only = true;
    let mut path = None;

    for &(key, value) in &section.params {
        match canonical_key(key).as_str() {
            "path" | "directory" => path = Some(PathBuf::from(value)),
            "browseable" | "browsable" => share.browseable = parse_bool(value)?,
            "readonly" => share.read_only = parse_bool(value)?,
            "writable" | "writeable" | "writeok" => share.read_only = !parse_bool(value)?,
            "guestok" | "public" => share.guest_allowed = parse_bool(value)?,
            "createmask" | "createmode" => share.create_mask = Some(value.to_owned()),
            "directorymask" | "directorymode" => share.directory_mask = Some(value.to_owned()),
            "forceuser" => share.force_user = Some(value.to_owned()),
            "forcegroup" => share.force_group = Some(value.to_owned()),
            "validusers" => {
                share.valid_users = value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect();
            }
            other => debug!("ignoring smb parameter '{other}' in [{}]", section.name),
        }
    }

    share.path = path.ok_or_else(|| "section has no path".to_owned())?;
    share.normalize().map_err(|e| e.to_string())
}

impl Renderer for SmbRenderer {
    fn protocol(&self) -> Protocol {
        Protocol::Smb
    }

    fn render(&self, share: &ShareDefinition) -> Result<ConfigFragment, RenderError> {
        let share = expect_protocol(Protocol::Smb, share)?;

        let mut text = String::new();
        let mut param = |key: &str, value: &str| {
            let _ = writeln!(text, "{INDENT}{key} = {value}");
        };
        param("path", &share.path.to_string_lossy());
        param("browseable", yes_no(share.browseable));
        param("read only", yes_no(share.read_only));
        param("guest ok", yes_no(share.guest_allowed));
        if let Some(mask) = &share.create_mask {
            param("create mask", mask);
        }
        if let Some(mask) = &share.directory_mask {
            param("directory mask", mask);
        }
        if let Some(user) = &share.force_user {
            param("force user", user);
        }
        if let Some(group) = &share.force_group {
            param("force group", group);
        }
        if !share.valid_users.is_empty() {
            param("valid users", &share.valid_users.join(" "));
        }

        Ok(ConfigFragment {
            protocol: Protocol::Smb,
            text: format!("[{}]\n{text}", share.name),
            name: share.name,
            account: None,
        })
    }

    fn locate(&self, document: &str, name: &str) -> Option<Range<usize>> {
        scan(document)
            .sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.start..s.end)
    }

    fn parse(&self, document: &str) -> Result<Vec<ShareDefinition>, RenderError> {
        let scan = scan(document);
        if let Some(&line) = scan.malformed_headers.first() {
            return Err(RenderError::Malformed {
                protocol: Protocol::Smb,
                line,
                reason: "section header is missing ']'".to_owned(),
            });
        }

        let mut shares = Vec::new();
        for section in &scan.sections {
            if SPECIAL_SECTIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(section.name))
            {
                continue;
            }
            match share_from_section(section) {
                Ok(share) => shares.push(share),
                Err(reason) => warn!(
                    "skipping smb section [{}] at line {}: {reason}",
                    section.name, section.line
                ),
            }
        }
        Ok(shares)
    }

    fn lint(&self, document: &str) -> Vec<String> {
        let scan = scan(document);
        let mut findings: Vec<String> = scan
            .malformed_headers
            .iter()
            .map(|line| format!("line {line}: section header is missing ']'"))
            .collect();

        for (i, section) in scan.sections.iter().enumerate() {
            let earlier = scan.sections[..i]
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(section.name));
            if let Some(first) = earlier {
                findings.push(format!(
                    "line {}: section [{}] duplicates the section at line {}",
                    section.line, section.name, first.line
                ));
            }
        }
        findings
    }

    fn append(&self, document: &str, fragment: &ConfigFragment) -> String {
        let mut out = String::with_capacity(document.len() + fragment.text.len() + 2);
        out.push_str(document);
        if !out.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            if !out.ends_with("\n\n") {
                out.push('\n');
            }
        }
        out.push_str(&fragment.text);
        out
    }

    fn cut(&self, document: &str, range: Range<usize>) -> String {
        // Take the blank separator lines that followed the section with it.
        let mut end = range.end;
        for (offset, line) in lines_with_offsets(&document[range.end..]) {
            if !is_blank(line) {
                break;
            }
            end = range.end + offset + line.len();
        }

        // The last section also takes the separator that preceded it.
        let mut start = range.start;
        if end == document.len() {
            let head = &document[..range.start];
            let content = head.trim_end();
            start = if content.is_empty() {
                0
            } else {
                head[content.len()..]
                    .find('\n')
                    .map_or(head.len(), |i| content.len() + i + 1)
            };
        }

        let mut out = String::with_capacity(document.len());
        out.push_str(&document[..start]);
        out.push_str(&document[end..]);
        out
    }
}
