use crate::DaemonError;
use serde::{Deserialize, Serialize};
use sharewright_render::renderer_for;
use sharewright_schema::Protocol;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Placeholder replaced by the candidate config path in check commands.
pub const CONFIG_PLACEHOLDER: &str = "{config}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Every configured unit is active.
    Active,
    /// Some units are active or in transition.
    Degraded,
    /// No unit is active.
    Down,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Active => write!(f, "active"),
            Health::Degraded => write!(f, "degraded"),
            Health::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Active,
    /// Reloading, activating, or otherwise on its way.
    Transitioning,
    Inactive,
}

impl UnitState {
    /// Interpret `systemctl is-active` output.
    pub fn from_systemctl(word: &str) -> Self {
        match word.trim() {
            "active" => UnitState::Active,
            "reloading" | "activating" | "refreshing" => UnitState::Transitioning,
            _ => UnitState::Inactive,
        }
    }
}

impl Health {
    pub fn from_units(states: &[UnitState]) -> Self {
        if states.iter().all(|s| *s == UnitState::Active) {
            Health::Active
        } else if states.iter().any(|s| *s != UnitState::Inactive) {
            Health::Degraded
        } else {
            Health::Down
        }
    }
}

/// How to talk to the daemon behind one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    pub protocol: Protocol,
    pub units: Vec<String>,
    /// argv; `{config}` is replaced by the candidate file. `None` means the
    /// built-in lint is the only check.
    pub check_command: Option<Vec<String>>,
    /// Output substrings that fail the check even on exit status 0.
    pub check_fail_patterns: Vec<String>,
    pub reload_command: Vec<String>,
    pub check_timeout: Duration,
    pub reload_timeout: Duration,
    pub verify_timeout: Duration,
    pub poll_interval: Duration,
}

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_owned()).collect()
}

impl DaemonSpec {
    pub fn defaults(protocol: Protocol) -> Self {
        let (units, check_command, check_fail_patterns, reload_command) = match protocol {
            Protocol::Smb => (
                argv(&["smbd"]),
                Some(argv(&["testparm", "-s", "--suppress-prompt", CONFIG_PLACEHOLDER])),
                argv(&["Unknown parameter"]),
                argv(&["systemctl", "reload", "smbd"]),
            ),
            Protocol::Nfs => (
                argv(&["nfs-server"]),
                None,
                Vec::new(),
                argv(&["exportfs", "-ra"]),
            ),
            // SIGHUP to the listener only; forked session processes keep running.
            Protocol::Ftp => (
                argv(&["vsftpd"]),
                None,
                Vec::new(),
                argv(&[
                    "systemctl",
                    "kill",
                    "--kill-whom=main",
                    "--signal=HUP",
                    "vsftpd",
                ]),
            ),
        };
        Self {
            protocol,
            units,
            check_command,
            check_fail_patterns,
            reload_command,
            check_timeout: Duration::from_secs(30),
            reload_timeout: Duration::from_secs(15),
            verify_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

pub trait DaemonValidator: Send + Sync {
    /// Check a candidate config file the way the daemon would parse it.
    fn check(&self, config: &Path) -> Result<(), DaemonError>;
}

pub trait DaemonController: Send + Sync {
    fn name(&self) -> &str;

    /// Make the daemon pick up the current config.
    fn reload(&self) -> Result<(), DaemonError>;

    fn unit_states(&self) -> Result<Vec<(String, UnitState)>, DaemonError>;

    fn health(&self) -> Result<Health, DaemonError> {
        let states: Vec<UnitState> = self.unit_states()?.into_iter().map(|(_, s)| s).collect();
        Ok(Health::from_units(&states))
    }

    /// Poll until every unit is active or `timeout` expires.
    fn verify(&self, timeout: Duration, poll: Duration) -> Result<(), DaemonError> {
        let started = Instant::now();
        loop {
            let health = self.health()?;
            if health == Health::Active {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DaemonError::VerifyTimeout { health, timeout });
            }
            debug!("{}: {health}, polling again", self.name());
            std::thread::sleep(poll);
        }
    }
}

pub trait Daemon: DaemonValidator + DaemonController {}

impl<T: DaemonValidator + DaemonController> Daemon for T {}

/// Lint the file with the protocol's renderer. A missing file is empty.
pub fn builtin_check(protocol: Protocol, config: &Path) -> Result<(), DaemonError> {
    let text = match std::fs::read_to_string(config) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let findings = renderer_for(protocol).lint(&text);
    if findings.is_empty() {
        Ok(())
    } else {
        Err(DaemonError::Syntax(findings.join("; ")))
    }
}

pub fn select_backend(name: &str, spec: DaemonSpec) -> Result<Box<dyn Daemon>, DaemonError> {
    match name {
        "systemd" => Ok(Box::new(crate::systemd::SystemdDaemon::new(spec))),
        "mock" => Ok(Box::new(crate::mock::MockDaemon::new(spec))),
        other => Err(DaemonError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_from_units() {
        use UnitState::{Active, Inactive, Transitioning};
        assert_eq!(Health::from_units(&[Active, Active]), Health::Active);
        assert_eq!(Health::from_units(&[Active, Inactive]), Health::Degraded);
        assert_eq!(Health::from_units(&[Transitioning, Inactive]), Health::Degraded);
        assert_eq!(Health::from_units(&[Inactive, Inactive]), Health::Down);
    }

    #[test]
    fn unit_state_from_systemctl() {
        assert_eq!(UnitState::from_systemctl("active\n"), UnitState::Active);
        assert_eq!(UnitState::from_systemctl("reloading"), UnitState::Transitioning);
        assert_eq!(UnitState::from_systemctl("failed"), UnitState::Inactive);
        assert_eq!(UnitState::from_systemctl("unknown"), UnitState::Inactive);
    }

    #[test]
    fn defaults_per_protocol() {
        let smb = DaemonSpec::defaults(Protocol::Smb);
        assert_eq!(smb.units, vec!["smbd"]);
        assert_eq!(smb.reload_command, vec!["systemctl", "reload", "smbd"]);
        assert!(smb.check_command.unwrap().contains(&"{config}".to_owned()));

        let nfs = DaemonSpec::defaults(Protocol::Nfs);
        assert!(nfs.check_command.is_none());
        assert_eq!(nfs.reload_command, vec!["exportfs", "-ra"]);

        let ftp = DaemonSpec::defaults(Protocol::Ftp);
        assert!(!ftp.reload_command.iter().any(|w| w == "restart"));
        assert!(ftp.reload_command.contains(&"--signal=HUP".to_owned()));
        assert!(ftp.reload_command.contains(&"--kill-whom=main".to_owned()));
        assert_eq!(ftp.verify_timeout, Duration::from_secs(10));
        assert_eq!(ftp.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn builtin_check_uses_renderer_lint() {
        let dir = tempfile::tempdir().unwrap();
        let exports = dir.path().join("exports");
        std::fs::write(&exports, "/srv *(ro) host(rw)\n").unwrap();
        assert!(matches!(
            builtin_check(Protocol::Nfs, &exports),
            Err(DaemonError::Syntax(_))
        ));
        std::fs::write(&exports, "/srv host(rw)\n").unwrap();
        builtin_check(Protocol::Nfs, &exports).unwrap();
        builtin_check(Protocol::Nfs, &dir.path().join("missing")).unwrap();
    }

    #[test]
    fn select_backends() {
        assert!(select_backend("systemd", DaemonSpec::defaults(Protocol::Smb)).is_ok());
        assert!(select_backend("mock", DaemonSpec::defaults(Protocol::Nfs)).is_ok());
        assert!(matches!(
            select_backend("openrc", DaemonSpec::defaults(Protocol::Ftp)),
            Err(DaemonError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn health_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Health::Degraded).unwrap(), "\"degraded\"");
    }
}
