use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;
use sharewright_core::{ProtocolLock, Settings};
use sharewright_daemon::{check_prereqs, format_missing};
use sharewright_render::renderer_for;
use sharewright_schema::Protocol;
use sharewright_store::{ConfigStore, Journal, StateLayout};
use std::path::Path;

pub fn run(settings_path: Option<&Path>, settings: &Settings, json: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();

    match settings_path {
        Some(path) => checks.push(Check::pass(
            "settings",
            &format!("Settings loaded from {}", path.display()),
        )),
        None => checks.push(Check::info(
            "settings",
            "No settings file found, using built-in defaults",
        )),
    }

    let layout = StateLayout::new(&settings.state_dir);
    let state_ready = layout.root().exists();
    if state_ready {
        check_state(&layout, &mut checks);
    } else {
        checks.push(Check::info(
            "state_dir",
            &format!(
                "State directory {} not initialized (created on first apply)",
                layout.root().display()
            ),
        ));
    }

    for protocol in Protocol::ALL {
        check_protocol(settings, &layout, state_ready, protocol, &mut checks);
    }

    print_results(&checks, json)
}

fn check_state(layout: &StateLayout, checks: &mut Vec<Check>) {
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("state_version", "State format version valid")),
        Err(e) => checks.push(Check::fail(
            "state_version",
            &format!("State version check failed: {e}"),
        )),
    }

    match Journal::new(layout).list_incomplete() {
        Ok(entries) if entries.is_empty() => {
            checks.push(Check::pass("journal", "Journal is clean"));
        }
        Ok(entries) => checks.push(Check::warn(
            "journal",
            &format!(
                "Journal has {} incomplete operation(s) (rolled back on next start or `sharewright recover`)",
                entries.len()
            ),
        )),
        Err(e) => checks.push(Check::warn("journal", &format!("Cannot read journal: {e}"))),
    }
}

fn check_protocol(
    settings: &Settings,
    layout: &StateLayout,
    state_ready: bool,
    protocol: Protocol,
    checks: &mut Vec<Check>,
) {
    let backend = settings.backend(protocol);
    checks.push(Check::info(
        &format!("{protocol}_backend"),
        &format!("{protocol}: {backend} backend"),
    ));

    let store = ConfigStore::new(settings.config_path(protocol));
    let name = format!("{protocol}_config");
    if store.exists() {
        match store.read_or_empty() {
            Ok(document) => {
                let problems = renderer_for(protocol).lint(&document);
                if problems.is_empty() {
                    checks.push(Check::pass(
                        &name,
                        &format!("{protocol}: {} is consistent", store.path().display()),
                    ));
                } else {
                    checks.push(Check::fail(
                        &name,
                        &format!(
                            "{protocol}: {} is ambiguous: {}",
                            store.path().display(),
                            problems.join("; ")
                        ),
                    ));
                }
            }
            Err(e) => checks.push(Check::fail(
                &name,
                &format!("{protocol}: cannot read {}: {e}", store.path().display()),
            )),
        }
    } else {
        checks.push(Check::info(
            &name,
            &format!(
                "{protocol}: {} does not exist yet",
                store.path().display()
            ),
        ));
    }

    if backend == "systemd" {
        let missing = check_prereqs(&settings.daemon_spec(protocol));
        let name = format!("{protocol}_prereqs");
        if missing.is_empty() {
            checks.push(Check::pass(
                &name,
                &format!("{protocol}: daemon tools present"),
            ));
        } else {
            checks.push(Check::fail(
                &name,
                &format!(
                    "{protocol}: missing prerequisites:\n{}",
                    format_missing(&missing).trim_end()
                ),
            ));
        }
    }

    if state_ready {
        let name = format!("{protocol}_lock");
        match ProtocolLock::try_acquire(&layout.lock_file(protocol)) {
            Ok(Some(_)) => checks.push(Check::pass(&name, &format!("{protocol}: lock is free"))),
            Ok(None) => checks.push(Check::warn(
                &name,
                &format!("{protocol}: lock is held by another process"),
            )),
            Err(e) => checks.push(Check::fail(
                &name,
                &format!("{protocol}: cannot check lock: {e}"),
            )),
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    healthy: bool,
    checks: &'a [Check],
}

fn print_results(checks: &[Check], json: bool) -> Result<u8, String> {
    let healthy = checks.iter().all(|c| c.status != CheckStatus::Fail);
    if json {
        println!("{}", json_pretty(&Report { healthy, checks })?);
    } else {
        println!("Sharewright Doctor\n");
        for check in checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Fail => "✗",
                CheckStatus::Warn => "⚠",
                CheckStatus::Info => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if healthy {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: CheckStatus,
    message: String,
}

impl Check {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Info, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_settings(root: &Path) -> Settings {
        let mut settings = Settings {
            state_dir: root.join("state"),
            ..Settings::default()
        };
        for protocol in Protocol::ALL {
            let p = settings.protocol_mut(protocol);
            p.backend = Some("mock".to_owned());
            p.config_path = Some(root.join(format!("{protocol}.conf")));
        }
        settings
    }

    fn statuses(checks: &[Check], name: &str) -> Vec<CheckStatus> {
        checks
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c.status)
            .collect()
    }

    #[test]
    fn fresh_host_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let settings = mock_settings(dir.path());
        assert_eq!(run(None, &settings, true).unwrap(), EXIT_SUCCESS);
        assert!(!settings.state_dir.exists());
    }

    #[test]
    fn ambiguous_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = mock_settings(dir.path());
        std::fs::write(
            settings.config_path(Protocol::Smb),
            "[docs]\n   path = /a\n[docs]\n   path = /b\n",
        )
        .unwrap();

        let mut checks = Vec::new();
        let layout = StateLayout::new(&settings.state_dir);
        check_protocol(&settings, &layout, false, Protocol::Smb, &mut checks);
        assert_eq!(statuses(&checks, "smb_config"), vec![CheckStatus::Fail]);
        assert_eq!(run(None, &settings, true).unwrap(), EXIT_FAILURE);
    }

    #[test]
    fn initialized_state_reports_journal_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let settings = mock_settings(dir.path());
        let layout = StateLayout::new(&settings.state_dir);
        layout.initialize().unwrap();

        let mut checks = Vec::new();
        check_state(&layout, &mut checks);
        check_protocol(&settings, &layout, true, Protocol::Nfs, &mut checks);
        assert_eq!(statuses(&checks, "state_version"), vec![CheckStatus::Pass]);
        assert_eq!(statuses(&checks, "journal"), vec![CheckStatus::Pass]);
        assert_eq!(statuses(&checks, "nfs_lock"), vec![CheckStatus::Pass]);
        assert!(statuses(&checks, "nfs_prereqs").is_empty());
    }

    #[test]
    fn held_lock_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let settings = mock_settings(dir.path());
        let layout = StateLayout::new(&settings.state_dir);
        layout.initialize().unwrap();
        let _held = ProtocolLock::acquire(&layout.lock_file(Protocol::Ftp)).unwrap();

        let mut checks = Vec::new();
        check_protocol(&settings, &layout, true, Protocol::Ftp, &mut checks);
        assert_eq!(statuses(&checks, "ftp_lock"), vec![CheckStatus::Warn]);
    }
}
