//! Protocol renderers for Sharewright.
//!
//! Each renderer turns a `ShareDefinition` into the daemon's native config
//! fragment and edits a config document structurally: locate the fragment
//! for a share name, replace it in place, append it, or remove it, without
//! touching neighbouring fragments. `parse` is the inverse of `render` and
//! backs the engine's `list` operation; `lint` reports problems the daemon's
//! own parser would accept silently (duplicate sections, ambiguous exports).

pub mod ftp;
pub mod nfs;
pub mod smb;
mod text;

pub use ftp::{AccountPlan, FtpRenderer};
pub use nfs::NfsRenderer;
pub use smb::SmbRenderer;

use serde::{Deserialize, Serialize};
use sharewright_schema::{Protocol, SchemaError, ShareDefinition, ShareName};
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{expected} renderer cannot render a {actual} share")]
    ProtocolMismatch { expected: Protocol, actual: Protocol },
    #[error("malformed {protocol} config at line {line}: {reason}")]
    Malformed {
        protocol: Protocol,
        line: usize,
        reason: String,
    },
}

/// Rendered, protocol-native text for one share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFragment {
    pub protocol: Protocol,
    pub name: ShareName,
    pub text: String,
    /// FTP only: the OS account and directory layout backing the share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountPlan>,
}

pub trait Renderer: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Validate the share and render its fragment. Deterministic for equal input.
    fn render(&self, share: &ShareDefinition) -> Result<ConfigFragment, RenderError>;

    /// Byte range of the first fragment for `name`, matched exactly.
    fn locate(&self, document: &str, name: &str) -> Option<Range<usize>>;

    /// Reconstruct the share definitions present in `document`.
    fn parse(&self, document: &str) -> Result<Vec<ShareDefinition>, RenderError>;

    /// Problems in `document` that make the live config ambiguous.
    fn lint(&self, _document: &str) -> Vec<String> {
        Vec::new()
    }

    /// Append a fragment that is not yet present.
    fn append(&self, document: &str, fragment: &ConfigFragment) -> String {
        let mut out = String::with_capacity(document.len() + fragment.text.len() + 1);
        out.push_str(document);
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&fragment.text);
        out
    }

    /// Cut a located range out of the document.
    fn cut(&self, document: &str, range: Range<usize>) -> String {
        let mut out = String::with_capacity(document.len());
        out.push_str(&document[..range.start]);
        out.push_str(&document[range.end..]);
        out
    }

    /// Replace the existing fragment in place, or append it. Stray duplicates
    /// after the replaced fragment are removed.
    fn upsert(&self, document: &str, fragment: &ConfigFragment) -> String {
        let Some(range) = self.locate(document, &fragment.name) else {
            return self.append(document, fragment);
        };
        let head = &document[..range.start];
        let tail = self.remove(&document[range.end..], &fragment.name);

        let mut out = String::with_capacity(head.len() + fragment.text.len() + tail.len());
        out.push_str(head);
        out.push_str(&fragment.text);
        out.push_str(&tail);
        out
    }

    /// Remove every fragment for `name`. Returns the document unchanged if absent.
    fn remove(&self, document: &str, name: &str) -> String {
        let mut out = document.to_owned();
        while let Some(range) = self.locate(&out, name) {
            out = self.cut(&out, range);
        }
        out
    }
}

pub fn renderer_for(protocol: Protocol) -> Box<dyn Renderer> {
    match protocol {
        Protocol::Smb => Box::new(SmbRenderer),
        Protocol::Nfs => Box::new(NfsRenderer),
        Protocol::Ftp => Box::new(FtpRenderer),
    }
}

pub(crate) fn expect_protocol(
    expected: Protocol,
    share: &ShareDefinition,
) -> Result<ShareDefinition, RenderError> {
    if share.protocol != expected {
        return Err(RenderError::ProtocolMismatch {
            expected,
            actual: share.protocol,
        });
    }
    Ok(share.normalize()?)
}
