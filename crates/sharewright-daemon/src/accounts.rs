use crate::exec::run_with_timeout;
use crate::DaemonError;
use sharewright_render::AccountPlan;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const ACCOUNT_TIMEOUT: Duration = Duration::from_secs(15);

/// OS accounts backing FTP shares.
pub trait AccountProvisioner: Send + Sync {
    fn name(&self) -> &str;

    fn exists(&self, username: &str) -> Result<bool, DaemonError>;

    /// Create the account if missing, lay out its home directory and write
    /// its vsftpd per-user settings. Returns `true` when the account was
    /// created by this call.
    fn ensure(&self, plan: &AccountPlan) -> Result<bool, DaemonError>;

    /// Delete the account and its per-user settings. Its home directory is
    /// left in place.
    fn remove(&self, username: &str) -> Result<(), DaemonError>;
}

fn create_dir_with_mode(path: &Path, mode: u32) -> Result<(), DaemonError> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Create `home`, `upload/` and `download/` with the plan's modes.
pub(crate) fn prepare_home(plan: &AccountPlan) -> Result<(), DaemonError> {
    fs::create_dir_all(&plan.home)?;
    create_dir_with_mode(&plan.upload_dir, plan.upload_mode)?;
    create_dir_with_mode(&plan.download_dir, plan.download_mode)?;
    Ok(())
}

/// Write `<dir>/<username>` through a temp file so vsftpd never reads a
/// partial file.
pub(crate) fn write_user_config(dir: &Path, plan: &AccountPlan) -> Result<(), DaemonError> {
    fs::create_dir_all(dir)?;
    let target = dir.join(&plan.username);
    let tmp = dir.join(format!(".{}.tmp", plan.username));
    fs::write(&tmp, &plan.user_config)?;
    fs::rename(&tmp, &target)?;
    debug!("wrote vsftpd user config {}", target.display());
    Ok(())
}

pub(crate) fn remove_user_config(dir: &Path, username: &str) -> Result<(), DaemonError> {
    match fs::remove_file(dir.join(username)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Accounts managed with `useradd`/`userdel`.
pub struct SystemAccounts {
    shell: String,
    user_config_dir: PathBuf,
}

impl SystemAccounts {
    pub fn new(shell: impl Into<String>, user_config_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            user_config_dir: user_config_dir.into(),
        }
    }
}

fn run(argv: &[&str]) -> Result<crate::CommandOutput, DaemonError> {
    let argv: Vec<String> = argv.iter().map(|s| (*s).to_owned()).collect();
    run_with_timeout(&argv, ACCOUNT_TIMEOUT)
}

fn resolve_id(flag: &str, username: &str) -> Result<u32, DaemonError> {
    let out = run(&["id", flag, username])?;
    out.stdout
        .trim()
        .parse()
        .map_err(|_| DaemonError::Account(format!("cannot resolve id {flag} {username}")))
}

impl AccountProvisioner for SystemAccounts {
    fn name(&self) -> &'static str {
        "system"
    }

    fn exists(&self, username: &str) -> Result<bool, DaemonError> {
        Ok(run(&["id", "-u", username])?.success())
    }

    fn ensure(&self, plan: &AccountPlan) -> Result<bool, DaemonError> {
        let created = if self.exists(&plan.username)? {
            debug!("account {} already exists", plan.username);
            false
        } else {
            let home = plan.home.to_string_lossy();
            let out = run(&[
                "useradd",
                "--home-dir",
                &home,
                "--no-create-home",
                "--shell",
                &self.shell,
                &plan.username,
            ])?;
            if !out.success() {
                return Err(DaemonError::Account(format!(
                    "useradd {} failed: {}",
                    plan.username,
                    out.stderr.trim()
                )));
            }
            info!("created account {}", plan.username);
            true
        };

        prepare_home(plan)?;
        write_user_config(&self.user_config_dir, plan)?;
        let uid = resolve_id("-u", &plan.username)?;
        let gid = resolve_id("-g", &plan.username)?;
        for dir in [&plan.home, &plan.download_dir] {
            std::os::unix::fs::chown(dir, Some(uid), Some(gid))?;
        }
        Ok(created)
    }

    fn remove(&self, username: &str) -> Result<(), DaemonError> {
        remove_user_config(&self.user_config_dir, username)?;
        if !self.exists(username)? {
            return Ok(());
        }
        let out = run(&["userdel", username])?;
        if !out.success() {
            return Err(DaemonError::Account(format!(
                "userdel {username} failed: {}",
                out.stderr.trim()
            )));
        }
        info!("removed account {username}");
        Ok(())
    }
}

pub fn select_provisioner(
    name: &str,
    shell: &str,
    user_config_dir: &Path,
) -> Result<Box<dyn AccountProvisioner>, DaemonError> {
    match name {
        "system" => Ok(Box::new(SystemAccounts::new(shell, user_config_dir))),
        "mock" => Ok(Box::new(crate::mock::MockAccounts::new())),
        other => Err(DaemonError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharewright_schema::{Protocol, ShareDefinition};

    #[test]
    fn prepare_home_sets_modes() {
        let dir = tempfile::tempdir().unwrap();
        let share = ShareDefinition::new(Protocol::Ftp, "alice", dir.path().join("alice"));
        let plan = AccountPlan::for_share(&share);
        prepare_home(&plan).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&plan.upload_dir), 0o777);
        assert_eq!(mode(&plan.download_dir), 0o755);
        prepare_home(&plan).unwrap();
    }

    #[test]
    fn read_only_share_locks_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut share = ShareDefinition::new(Protocol::Ftp, "bob", dir.path().join("bob"));
        share.read_only = true;
        let plan = AccountPlan::for_share(&share);
        prepare_home(&plan).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&plan.upload_dir), 0o555);
    }

    #[test]
    fn user_config_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let conf_dir = dir.path().join("user_conf");
        let mut share = ShareDefinition::new(Protocol::Ftp, "carol", dir.path().join("carol"));
        share.read_only = true;
        let plan = AccountPlan::for_share(&share);

        write_user_config(&conf_dir, &plan).unwrap();
        let written = fs::read_to_string(conf_dir.join("carol")).unwrap();
        assert_eq!(written, plan.user_config);
        assert!(written.contains("write_enable=NO\n"));
        assert_eq!(fs::read_dir(&conf_dir).unwrap().count(), 1);

        remove_user_config(&conf_dir, "carol").unwrap();
        assert!(!conf_dir.join("carol").exists());
        remove_user_config(&conf_dir, "carol").unwrap();
    }

    #[test]
    fn select_known_provisioners() {
        let conf_dir = Path::new("/etc/vsftpd/user_conf");
        assert_eq!(
            select_provisioner("system", "/usr/sbin/nologin", conf_dir)
                .unwrap()
                .name(),
            "system"
        );
        assert_eq!(select_provisioner("mock", "", conf_dir).unwrap().name(), "mock");
        assert!(select_provisioner("ldap", "", conf_dir).is_err());
    }
}
