use crate::backend::DaemonSpec;
use sharewright_schema::Protocol;
use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with an install hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn package_hint(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Smb => "apt install samba | dnf install samba | zypper install samba",
        Protocol::Nfs => {
            "apt install nfs-kernel-server | dnf install nfs-utils | zypper install nfs-kernel-server"
        }
        Protocol::Ftp => "apt install vsftpd | dnf install vsftpd | zypper install vsftpd",
    }
}

/// Tools the `systemd` backend of `spec` needs. Empty means ready.
pub fn check_prereqs(spec: &DaemonSpec) -> Vec<MissingPrereq> {
    let mut missing: Vec<MissingPrereq> = Vec::new();
    let mut require = |name: &str, purpose: &'static str, install_hint: &'static str| {
        if !missing.iter().any(|m| m.name == name) && !command_exists(name) {
            missing.push(MissingPrereq {
                name: name.to_owned(),
                purpose,
                install_hint,
            });
        }
    };

    let hint = package_hint(spec.protocol);
    if let Some(program) = spec.check_command.as_ref().and_then(|c| c.first()) {
        require(program, "config validation", hint);
    }
    if let Some(program) = spec.reload_command.first() {
        require(program, "daemon reload", hint);
    }
    require(
        "systemctl",
        "unit health checks",
        "part of systemd (usually pre-installed)",
    );
    if spec.protocol == Protocol::Ftp {
        for tool in ["useradd", "userdel", "id"] {
            require(tool, "FTP account provisioning", "part of shadow-utils / coreutils");
        }
    }

    missing
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "testparm".to_owned(),
            purpose: "config validation",
            install_hint: "apt install samba",
        };
        let s = m.to_string();
        assert!(s.contains("testparm"));
        assert!(s.contains("config validation"));
        assert!(s.contains("apt install samba"));
    }

    #[test]
    fn reports_unknown_tools_once() {
        let mut spec = DaemonSpec::defaults(Protocol::Nfs);
        spec.reload_command = vec!["sharewright-missing-tool".to_owned()];
        spec.check_command = Some(vec!["sharewright-missing-tool".to_owned()]);
        let missing = check_prereqs(&spec);
        let count = missing
            .iter()
            .filter(|m| m.name == "sharewright-missing-tool")
            .count();
        assert_eq!(count, 1);
        assert!(format_missing(&missing).starts_with("missing prerequisites:\n"));
    }

    #[test]
    fn absolute_paths_are_checked_directly() {
        assert!(command_exists("/bin/sh"));
        assert!(!command_exists("/nonexistent/tool"));
    }
}
