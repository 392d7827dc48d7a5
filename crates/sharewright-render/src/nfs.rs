//! `/etc/exports` lines.
//!
//! A share is every logical line whose first token is its export path. The
//! renderer writes one line per client; parsing also accepts the denser
//! `path a(opts) b(opts)` form, bare clients and `-opts` default options.

use crate::text::{is_blank, is_comment, logical_lines};
use crate::{expect_protocol, ConfigFragment, RenderError, Renderer};
use sharewright_schema::{Protocol, ShareDefinition, NFS_WILDCARD_CLIENT};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::Range;
use std::path::Path;
use tracing::warn;

/// uid/gid of `nobody` on Debian-family systems.
const ANON_ID: u32 = 65534;

pub struct NfsRenderer;

#[derive(Debug, Clone)]
struct Client {
    spec: String,
    options: Vec<String>,
}

#[derive(Debug)]
struct ExportLine {
    path: String,
    range: Range<usize>,
    number: usize,
    clients: Vec<Client>,
    error: Option<String>,
}

fn split_path(text: &str) -> Result<(&str, &str), String> {
    if let Some(rest) = text.strip_prefix('"') {
        let end = rest
            .find('"')
            .ok_or_else(|| "unterminated quoted path".to_owned())?;
        Ok((&rest[..end], &rest[end + 1..]))
    } else {
        let end = text.find(char::is_whitespace).unwrap_or(text.len());
        Ok((&text[..end], &text[end..]))
    }
}

fn split_options(options: &str) -> Vec<String> {
    options
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_clients(rest: &str) -> Result<Vec<Client>, String> {
    let mut defaults = Vec::new();
    let mut clients = Vec::new();

    for token in rest.split_whitespace() {
        if let Some(opts) = token.strip_prefix('-') {
            defaults = split_options(opts);
            continue;
        }
        match token.find('(') {
            Some(open) => {
                let inner = token[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| format!("'{token}' is missing ')'"))?;
                let spec = &token[..open];
                clients.push(Client {
                    spec: if spec.is_empty() {
                        NFS_WILDCARD_CLIENT.to_owned()
                    } else {
                        spec.to_owned()
                    },
                    options: split_options(inner),
                });
            }
            None => clients.push(Client {
                spec: token.to_owned(),
                options: defaults.clone(),
            }),
        }
    }

    if clients.is_empty() {
        // exportfs treats a bare path as exported to the world.
        clients.push(Client {
            spec: NFS_WILDCARD_CLIENT.to_owned(),
            options: defaults,
        });
    }
    Ok(clients)
}

fn scan(document: &str) -> Vec<ExportLine> {
    let mut out = Vec::new();
    for line in logical_lines(document) {
        if is_blank(&line.text) || is_comment(&line.text) {
            continue;
        }
        let (path, clients, error) = match split_path(&line.text) {
            Ok((path, rest)) => match parse_clients(rest) {
                Ok(clients) => (path.to_owned(), clients, None),
                Err(reason) => (path.to_owned(), Vec::new(), Some(reason)),
            },
            Err(reason) => (String::new(), Vec::new(), Some(reason)),
        };
        out.push(ExportLine {
            path,
            range: line.range,
            number: line.number,
            clients,
            error,
        });
    }
    out
}

/// Last of `on`/`off` wins; `default` when neither appears.
fn flag(options: &[String], on: &str, off: &str, default: bool) -> bool {
    options
        .iter()
        .rev()
        .find_map(|o| {
            if o == on {
                Some(true)
            } else if o == off {
                Some(false)
            } else {
                None
            }
        })
        .unwrap_or(default)
}

fn quote_path(path: &str) -> String {
    if path.chars().any(char::is_whitespace) {
        format!("\"{path}\"")
    } else {
        path.to_owned()
    }
}

fn export_options(share: &ShareDefinition) -> String {
    let access = if share.read_only { "ro" } else { "rw" };
    let squash = if share.guest_allowed {
        format!("all_squash,anonuid={ANON_ID},anongid={ANON_ID}")
    } else {
        "root_squash".to_owned()
    };
    format!("{access},sync,no_subtree_check,{squash}")
}

#[derive(Debug, Clone, Copy)]
struct Network {
    bits: u128,
    width: u32,
    prefix: u32,
}

impl Network {
    fn parse(spec: &str) -> Option<Self> {
        let (addr, mask) = match spec.split_once('/') {
            Some((addr, mask)) => (addr, Some(mask)),
            None => (spec, None),
        };
        let addr: IpAddr = addr.parse().ok()?;
        let (bits, width) = match addr {
            IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
            IpAddr::V6(v6) => (u128::from(v6), 128),
        };
        let prefix = match mask {
            None => width,
            Some(m) => match m.parse::<u32>() {
                Ok(p) => p,
                Err(_) => u32::from(m.parse::<Ipv4Addr>().ok()?).count_ones(),
            },
        };
        (prefix <= width).then_some(Self {
            bits,
            width,
            prefix,
        })
    }

    fn network_bits(&self, prefix: u32) -> u128 {
        if prefix == 0 {
            0
        } else {
            self.bits >> (self.width - prefix)
        }
    }

    fn contains(&self, other: &Network) -> bool {
        self.width == other.width
            && self.prefix <= other.prefix
            && self.network_bits(self.prefix) == other.network_bits(self.prefix)
    }
}

impl Renderer for NfsRenderer {
    fn protocol(&self) -> Protocol {
        Protocol::Nfs
    }

    fn render(&self, share: &ShareDefinition) -> Result<ConfigFragment, RenderError> {
        let share = expect_protocol(Protocol::Nfs, share)?;
        let path = quote_path(&share.path.to_string_lossy());
        let options = export_options(&share);

        let mut text = String::new();
        for client in &share.allowed_clients {
            let _ = writeln!(text, "{path} {client}({options})");
        }

        Ok(ConfigFragment {
            protocol: Protocol::Nfs,
            name: share.name,
            text,
            account: None,
        })
    }

    fn locate(&self, document: &str, name: &str) -> Option<Range<usize>> {
        let lines = scan(document);
        let first = lines.iter().position(|l| l.path == name)?;
        let mut range = lines[first].range.clone();
        for line in &lines[first + 1..] {
            // Only a directly adjacent line continues the run.
            if line.path != name || line.range.start != range.end {
                break;
            }
            range.end = line.range.end;
        }
        Some(range)
    }

    fn parse(&self, document: &str) -> Result<Vec<ShareDefinition>, RenderError> {
        let mut shares: Vec<ShareDefinition> = Vec::new();

        for line in scan(document) {
            if let Some(reason) = line.error {
                return Err(RenderError::Malformed {
                    protocol: Protocol::Nfs,
                    line: line.number,
                    reason,
                });
            }
            let specs = line.clients.iter().map(|c| c.spec.clone());
            if let Some(share) = shares.iter_mut().find(|s| s.path == Path::new(&line.path)) {
                share.allowed_clients.extend(specs);
                continue;
            }

            let mut share = ShareDefinition::nfs_export(&line.path);
            let first = &line.clients[0].options;
            share.read_only = flag(first, "ro", "rw", true);
            share.guest_allowed = flag(first, "all_squash", "no_all_squash", false);
            share.allowed_clients = specs.collect();
            shares.push(share);
        }

        Ok(shares
            .into_iter()
            .filter_map(|share| match share.normalize() {
                Ok(share) => Some(share),
                Err(e) => {
                    warn!("skipping export {}: {e}", share.path.display());
                    None
                }
            })
            .collect())
    }

    fn lint(&self, document: &str) -> Vec<String> {
        let lines = scan(document);
        let mut findings = Vec::new();
        let mut by_path: Vec<(&str, Vec<(&str, usize)>)> = Vec::new();

        for line in &lines {
            if let Some(reason) = &line.error {
                findings.push(format!("line {}: {reason}", line.number));
                continue;
            }
            let entry = match by_path.iter_mut().position(|(p, _)| *p == line.path) {
                Some(i) => &mut by_path[i].1,
                None => {
                    by_path.push((&line.path, Vec::new()));
                    let last = by_path.len() - 1;
                    &mut by_path[last].1
                }
            };
            entry.extend(line.clients.iter().map(|c| (c.spec.as_str(), line.number)));
        }

        for (path, clients) in &by_path {
            for (i, &(spec, number)) in clients.iter().enumerate() {
                if let Some(&(_, first)) = clients[..i].iter().find(|(s, _)| *s == spec) {
                    findings.push(format!(
                        "line {number}: {path} lists client {spec} again (first at line {first})"
                    ));
                }
            }

            let distinct: Vec<&str> = clients.iter().fold(Vec::new(), |mut acc, &(s, _)| {
                if !acc.contains(&s) {
                    acc.push(s);
                }
                acc
            });
            if distinct.len() > 1 && distinct.contains(&NFS_WILDCARD_CLIENT) {
                findings.push(format!(
                    "{path}: '*' is combined with other clients; options are ambiguous"
                ));
            }

            let networks: Vec<(&str, Network)> = distinct
                .iter()
                .filter_map(|s| Network::parse(s).map(|n| (*s, n)))
                .collect();
            for (a, net_a) in &networks {
                for (b, net_b) in &networks {
                    if a != b && net_a.contains(net_b) && !(net_b.contains(net_a) && a > b) {
                        findings.push(format!("{path}: client {b} is already covered by {a}"));
                    }
                }
            }
        }
        findings
    }
}
