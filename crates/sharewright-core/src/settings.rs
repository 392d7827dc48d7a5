//! Engine settings, loaded from TOML.
//!
//! ```toml
//! state_dir = "/var/lib/sharewright"
//!
//! [smb]
//! config_path = "/etc/samba/smb.conf"
//! backup_dir = "/var/backups/sharewright"
//! units = ["smbd"]
//!
//! [nfs]
//! backend = "mock"
//!
//! [accounts]
//! shell = "/bin/false"
//! user_config_dir = "/etc/vsftpd/user_conf"
//! ```
//!
//! Every key is optional. Unset protocol keys fall back to the daemon
//! defaults for that protocol.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use sharewright_daemon::DaemonSpec;
use sharewright_schema::Protocol;
use sharewright_store::BackupManager;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sharewright/sharewright.toml";
/// Environment variable naming a settings file.
pub const CONFIG_ENV: &str = "SHAREWRIGHT_CONFIG";
const DEFAULT_STATE_DIR: &str = "/var/lib/sharewright";
const DEFAULT_BACKEND: &str = "systemd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub smb: ProtocolSettings,
    #[serde(default)]
    pub nfs: ProtocolSettings,
    #[serde(default)]
    pub ftp: ProtocolSettings,
    #[serde(default)]
    pub accounts: AccountSettings,
}

/// Overrides for one protocol. `None` keeps the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolSettings {
    pub config_path: Option<PathBuf>,
    /// Backups go next to the config file when unset.
    pub backup_dir: Option<PathBuf>,
    /// `systemd` or `mock`.
    pub backend: Option<String>,
    pub units: Option<Vec<String>>,
    /// argv with `{config}` for the candidate file; `[]` disables the
    /// external check and leaves only the built-in lint.
    pub check_command: Option<Vec<String>>,
    pub check_fail_patterns: Option<Vec<String>>,
    pub reload_command: Option<Vec<String>>,
    pub check_timeout_ms: Option<u64>,
    pub reload_timeout_ms: Option<u64>,
    pub verify_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSettings {
    /// `system` or `mock`.
    #[serde(default = "default_account_backend")]
    pub backend: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// vsftpd `user_config_dir`; one settings file per FTP account.
    #[serde(default = "default_user_config_dir")]
    pub user_config_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_account_backend() -> String {
    "system".to_owned()
}

fn default_shell() -> String {
    "/usr/sbin/nologin".to_owned()
}

fn default_user_config_dir() -> PathBuf {
    PathBuf::from("/etc/vsftpd/user_conf")
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            backend: default_account_backend(),
            shell: default_shell(),
            user_config_dir: default_user_config_dir(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            smb: ProtocolSettings::default(),
            nfs: ProtocolSettings::default(),
            ftp: ProtocolSettings::default(),
            accounts: AccountSettings::default(),
        }
    }
}

fn default_config_path(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Smb => "/etc/samba/smb.conf",
        Protocol::Nfs => "/etc/exports",
        Protocol::Ftp => "/etc/vsftpd.user_list",
    }
}

impl Settings {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Settings {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("loaded settings from {}", path.display());
        Self::from_toml_str(&content, path)
    }

    /// The settings file to use: `explicit`, else `$SHAREWRIGHT_CONFIG`, else
    /// the system default if it exists.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let system = PathBuf::from(DEFAULT_CONFIG_PATH);
        system.is_file().then_some(system)
    }

    pub fn protocol(&self, protocol: Protocol) -> &ProtocolSettings {
        match protocol {
            Protocol::Smb => &self.smb,
            Protocol::Nfs => &self.nfs,
            Protocol::Ftp => &self.ftp,
        }
    }

    pub fn protocol_mut(&mut self, protocol: Protocol) -> &mut ProtocolSettings {
        match protocol {
            Protocol::Smb => &mut self.smb,
            Protocol::Nfs => &mut self.nfs,
            Protocol::Ftp => &mut self.ftp,
        }
    }

    pub fn config_path(&self, protocol: Protocol) -> PathBuf {
        self.protocol(protocol)
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_config_path(protocol)))
    }

    pub fn backend(&self, protocol: Protocol) -> &str {
        self.protocol(protocol)
            .backend
            .as_deref()
            .unwrap_or(DEFAULT_BACKEND)
    }

    pub fn backup_manager(&self, protocol: Protocol) -> BackupManager {
        BackupManager::new(self.protocol(protocol).backup_dir.clone())
    }

    pub fn daemon_spec(&self, protocol: Protocol) -> DaemonSpec {
        let mut spec = DaemonSpec::defaults(protocol);
        let overrides = self.protocol(protocol);
        if let Some(units) = &overrides.units {
            spec.units.clone_from(units);
        }
        if let Some(command) = &overrides.check_command {
            spec.check_command = (!command.is_empty()).then(|| command.clone());
        }
        if let Some(patterns) = &overrides.check_fail_patterns {
            spec.check_fail_patterns.clone_from(patterns);
        }
        if let Some(command) = &overrides.reload_command {
            spec.reload_command.clone_from(command);
        }
        let ms = Duration::from_millis;
        if let Some(t) = overrides.check_timeout_ms {
            spec.check_timeout = ms(t);
        }
        if let Some(t) = overrides.reload_timeout_ms {
            spec.reload_timeout = ms(t);
        }
        if let Some(t) = overrides.verify_timeout_ms {
            spec.verify_timeout = ms(t);
        }
        if let Some(t) = overrides.poll_interval_ms {
            spec.poll_interval = ms(t);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let settings = Settings::from_toml_str("", Path::new("test.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.state_dir, PathBuf::from("/var/lib/sharewright"));
        assert_eq!(settings.config_path(Protocol::Nfs), PathBuf::from("/etc/exports"));
        assert_eq!(settings.backend(Protocol::Smb), "systemd");
        assert_eq!(settings.accounts.shell, "/usr/sbin/nologin");
        assert_eq!(
            settings.accounts.user_config_dir,
            PathBuf::from("/etc/vsftpd/user_conf")
        );
        assert_eq!(
            settings.daemon_spec(Protocol::Ftp),
            DaemonSpec::defaults(Protocol::Ftp)
        );
    }

    #[test]
    fn protocol_overrides_apply_to_one_protocol() {
        let settings = Settings::from_toml_str(
            r#"
state_dir = "/tmp/sw"

[smb]
config_path = "/tmp/smb.conf"
units = ["smbd"]
check_command = []
verify_timeout_ms = 500

[nfs]
backend = "mock"
reload_command = ["exportfs", "-r"]
"#,
            Path::new("test.toml"),
        )
        .unwrap();

        let smb = settings.daemon_spec(Protocol::Smb);
        assert_eq!(smb.units, vec!["smbd"]);
        assert!(smb.check_command.is_none());
        assert_eq!(smb.verify_timeout, Duration::from_millis(500));
        assert_eq!(smb.reload_command, vec!["systemctl", "reload", "smbd"]);
        assert_eq!(settings.config_path(Protocol::Smb), PathBuf::from("/tmp/smb.conf"));

        assert_eq!(settings.backend(Protocol::Nfs), "mock");
        assert_eq!(
            settings.daemon_spec(Protocol::Nfs).reload_command,
            vec!["exportfs", "-r"]
        );
        assert_eq!(settings.backend(Protocol::Ftp), "systemd");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Settings::from_toml_str("[smb]\nconfig = \"/x\"\n", Path::new("bad.toml"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad.toml"), "{msg}");
        assert!(msg.contains("config"), "{msg}");

        assert!(Settings::from_toml_str("statedir = \"/x\"\n", Path::new("bad.toml")).is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharewright.toml");
        std::fs::write(
            &path,
            "[accounts]\nbackend = \"mock\"\nuser_config_dir = \"/tmp/user_conf\"\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.accounts.backend, "mock");
        assert_eq!(settings.accounts.shell, "/usr/sbin/nologin");
        assert_eq!(settings.accounts.user_config_dir, PathBuf::from("/tmp/user_conf"));

        assert!(matches!(
            Settings::load(&dir.path().join("missing.toml")),
            Err(CoreError::Settings { .. })
        ));
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/somewhere/custom.toml");
        assert_eq!(Settings::locate(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn backup_dir_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("exports");
        std::fs::write(&conf, "/srv *(ro)\n").unwrap();

        let mut settings = Settings::default();
        settings.nfs.backup_dir = Some(dir.path().join("backups"));
        let snapshot = settings.backup_manager(Protocol::Nfs).snapshot(&conf).unwrap();
        assert!(snapshot.backup_path.starts_with(dir.path().join("backups")));
    }
}
