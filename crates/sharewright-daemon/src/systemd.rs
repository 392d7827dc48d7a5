use crate::backend::{builtin_check, DaemonController, DaemonSpec, DaemonValidator, UnitState};
use crate::exec::run_with_timeout;
use crate::DaemonError;
use std::path::Path;
use tracing::{debug, info};

/// Real daemons managed by systemd.
pub struct SystemdDaemon {
    spec: DaemonSpec,
}

impl SystemdDaemon {
    pub fn new(spec: DaemonSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &DaemonSpec {
        &self.spec
    }
}

/// Substitute the candidate path into a check command.
pub(crate) fn expand_check_command(argv: &[String], config: &Path) -> Vec<String> {
    let path = config.to_string_lossy();
    argv.iter()
        .map(|word| word.replace(crate::backend::CONFIG_PLACEHOLDER, &path))
        .collect()
}

impl DaemonValidator for SystemdDaemon {
    fn check(&self, config: &Path) -> Result<(), DaemonError> {
        builtin_check(self.spec.protocol, config)?;

        let Some(command) = &self.spec.check_command else {
            return Ok(());
        };
        let argv = expand_check_command(command, config);
        let output = run_with_timeout(&argv, self.spec.check_timeout)?;
        let combined = output.combined();

        if !output.success() {
            return Err(DaemonError::Syntax(format!(
                "{} exited with {}: {}",
                argv.join(" "),
                output
                    .code
                    .map_or_else(|| "a signal".to_owned(), |c| c.to_string()),
                combined.trim()
            )));
        }
        let diagnostics: Vec<&str> = combined
            .lines()
            .filter(|l| self.spec.check_fail_patterns.iter().any(|p| l.contains(p)))
            .collect();
        if !diagnostics.is_empty() {
            return Err(DaemonError::Syntax(diagnostics.join("; ")));
        }
        debug!("{} accepted {}", argv.join(" "), config.display());
        Ok(())
    }
}

impl DaemonController for SystemdDaemon {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn reload(&self) -> Result<(), DaemonError> {
        let output = run_with_timeout(&self.spec.reload_command, self.spec.reload_timeout)?;
        if !output.success() {
            return Err(DaemonError::CommandFailed {
                command: self.spec.reload_command.join(" "),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            });
        }
        info!("{}: {}", self.spec.protocol, self.spec.reload_command.join(" "));
        Ok(())
    }

    fn unit_states(&self) -> Result<Vec<(String, UnitState)>, DaemonError> {
        let mut states = Vec::with_capacity(self.spec.units.len());
        for unit in &self.spec.units {
            let argv = vec!["systemctl".to_owned(), "is-active".to_owned(), unit.clone()];
            // is-active exits non-zero for inactive units; stdout still names the state.
            let output = run_with_timeout(&argv, self.spec.verify_timeout)?;
            states.push((unit.clone(), UnitState::from_systemctl(&output.stdout)));
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharewright_schema::Protocol;
    use std::time::Duration;

    fn spec_with(check: Option<&str>, reload: &str) -> DaemonSpec {
        let mut spec = DaemonSpec::defaults(Protocol::Smb);
        spec.check_command =
            check.map(|c| vec!["sh".to_owned(), "-c".to_owned(), c.to_owned()]);
        spec.reload_command = vec!["sh".to_owned(), "-c".to_owned(), reload.to_owned()];
        spec.check_timeout = Duration::from_secs(5);
        spec.reload_timeout = Duration::from_secs(5);
        spec
    }

    #[test]
    fn check_command_gets_config_path() {
        let argv = vec!["testparm".to_owned(), "-s".to_owned(), "{config}".to_owned()];
        let expanded = expand_check_command(&argv, Path::new("/tmp/smb.conf"));
        assert_eq!(expanded, vec!["testparm", "-s", "/tmp/smb.conf"]);
    }

    #[test]
    fn check_fails_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("smb.conf");
        std::fs::write(&conf, "[docs]\n   path = /srv\n").unwrap();

        let daemon = SystemdDaemon::new(spec_with(Some("echo broken >&2; exit 1"), "true"));
        let err = daemon.check(&conf).unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");
    }

    #[test]
    fn check_fails_on_diagnostic_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("smb.conf");
        std::fs::write(&conf, "[docs]\n   path = /srv\n").unwrap();

        let daemon = SystemdDaemon::new(spec_with(
            Some("echo 'Unknown parameter encountered: \"pth\"' >&2"),
            "true",
        ));
        assert!(matches!(daemon.check(&conf), Err(DaemonError::Syntax(_))));

        let daemon = SystemdDaemon::new(spec_with(Some("echo 'Loaded services file OK.'"), "true"));
        daemon.check(&conf).unwrap();
    }

    #[test]
    fn check_runs_builtin_lint_first() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("smb.conf");
        std::fs::write(&conf, "[a]\n   path = /a\n[a]\n   path = /b\n").unwrap();
        let daemon = SystemdDaemon::new(spec_with(None, "true"));
        assert!(matches!(daemon.check(&conf), Err(DaemonError::Syntax(_))));
    }

    #[test]
    fn reload_reports_failure() {
        SystemdDaemon::new(spec_with(None, "true")).reload().unwrap();
        let err = SystemdDaemon::new(spec_with(None, "echo nope >&2; exit 2"))
            .reload()
            .unwrap_err();
        assert!(matches!(
            err,
            DaemonError::CommandFailed { code: Some(2), .. }
        ));
    }
}
