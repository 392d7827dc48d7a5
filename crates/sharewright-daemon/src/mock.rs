//! In-memory daemon and account backends.
//!
//! Both keep their state behind an `Arc`, so a test can hand the backend to
//! the engine and keep a handle to script failures and inspect calls.

use crate::accounts::{prepare_home, AccountProvisioner};
use crate::backend::{builtin_check, DaemonController, DaemonSpec, DaemonValidator, UnitState};
use crate::DaemonError;
use sharewright_render::AccountPlan;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A check, with the candidate bytes as they were at that moment.
    Check { config: PathBuf, content: String },
    Reload,
    EnsureAccount(String),
    RemoveAccount(String),
}

/// Shared, scriptable state of a mock backend.
///
/// `fail_*` counters make the next N calls of that kind fail;
/// `usize::MAX` means every call.
#[derive(Debug, Default)]
pub struct MockState {
    pub fail_checks: AtomicUsize,
    pub fail_reloads: AtomicUsize,
    pub fail_ensures: AtomicUsize,
    pub fail_removes: AtomicUsize,
    units: Mutex<Vec<(String, UnitState)>>,
    calls: Mutex<Vec<MockCall>>,
    accounts: Mutex<BTreeSet<String>>,
    user_configs: Mutex<BTreeMap<String, String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Consume one scripted failure, if any are left.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            usize::MAX => Some(usize::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

impl MockState {
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    pub fn reload_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| **c == MockCall::Reload)
            .count()
    }

    pub fn set_unit_state(&self, unit: &str, state: UnitState) {
        let mut units = lock(&self.units);
        match units.iter_mut().find(|(u, _)| u == unit) {
            Some(entry) => entry.1 = state,
            None => units.push((unit.to_owned(), state)),
        }
    }

    /// Every unit goes to `state`.
    pub fn set_all_units(&self, state: UnitState) {
        for entry in lock(&self.units).iter_mut() {
            entry.1 = state;
        }
    }

    pub fn has_account(&self, username: &str) -> bool {
        lock(&self.accounts).contains(username)
    }

    pub fn add_account(&self, username: &str) {
        lock(&self.accounts).insert(username.to_owned());
    }

    /// The per-user settings last written for `username`.
    pub fn user_config(&self, username: &str) -> Option<String> {
        lock(&self.user_configs).get(username).cloned()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }
}

pub struct MockDaemon {
    spec: DaemonSpec,
    state: Arc<MockState>,
}

impl MockDaemon {
    /// All configured units start active.
    pub fn new(spec: DaemonSpec) -> Self {
        let state = MockState::default();
        for unit in &spec.units {
            state.set_unit_state(unit, UnitState::Active);
        }
        Self {
            spec,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl DaemonValidator for MockDaemon {
    fn check(&self, config: &Path) -> Result<(), DaemonError> {
        let content = std::fs::read_to_string(config).unwrap_or_default();
        self.state.record(MockCall::Check {
            config: config.to_path_buf(),
            content,
        });
        if take_failure(&self.state.fail_checks) {
            return Err(DaemonError::Syntax("injected check failure".to_owned()));
        }
        builtin_check(self.spec.protocol, config)
    }
}

impl DaemonController for MockDaemon {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn reload(&self) -> Result<(), DaemonError> {
        self.state.record(MockCall::Reload);
        if take_failure(&self.state.fail_reloads) {
            return Err(DaemonError::CommandFailed {
                command: "mock reload".to_owned(),
                code: Some(1),
                stderr: "injected reload failure".to_owned(),
            });
        }
        Ok(())
    }

    fn unit_states(&self) -> Result<Vec<(String, UnitState)>, DaemonError> {
        Ok(lock(&self.state.units).clone())
    }
}

/// Accounts tracked in memory; home directories are created for real.
#[derive(Default)]
pub struct MockAccounts {
    state: Arc<MockState>,
}

impl MockAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl AccountProvisioner for MockAccounts {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn exists(&self, username: &str) -> Result<bool, DaemonError> {
        Ok(self.state.has_account(username))
    }

    fn ensure(&self, plan: &AccountPlan) -> Result<bool, DaemonError> {
        self.state
            .record(MockCall::EnsureAccount(plan.username.clone()));
        if take_failure(&self.state.fail_ensures) {
            return Err(DaemonError::Account(format!(
                "injected failure creating {}",
                plan.username
            )));
        }
        prepare_home(plan)?;
        lock(&self.state.user_configs).insert(plan.username.clone(), plan.user_config.clone());
        Ok(lock(&self.state.accounts).insert(plan.username.clone()))
    }

    fn remove(&self, username: &str) -> Result<(), DaemonError> {
        self.state.record(MockCall::RemoveAccount(username.to_owned()));
        if take_failure(&self.state.fail_removes) {
            return Err(DaemonError::Account(format!(
                "injected failure removing {username}"
            )));
        }
        lock(&self.state.user_configs).remove(username);
        lock(&self.state.accounts).remove(username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Health;
    use sharewright_schema::{Protocol, ShareDefinition};
    use std::time::Duration;

    #[test]
    fn scripted_failures_are_consumed() {
        let daemon = MockDaemon::new(DaemonSpec::defaults(Protocol::Smb));
        let state = daemon.state();
        state.fail_reloads.store(1, Ordering::SeqCst);
        assert!(daemon.reload().is_err());
        assert!(daemon.reload().is_ok());

        state.fail_reloads.store(usize::MAX, Ordering::SeqCst);
        assert!(daemon.reload().is_err());
        assert!(daemon.reload().is_err());
        assert_eq!(state.reload_count(), 4);
    }

    #[test]
    fn check_records_candidate_and_lints() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("exports");
        std::fs::write(&conf, "/srv a(ro)\n").unwrap();

        let daemon = MockDaemon::new(DaemonSpec::defaults(Protocol::Nfs));
        daemon.check(&conf).unwrap();
        std::fs::write(&conf, "/srv a(ro) a(rw)\n").unwrap();
        assert!(daemon.check(&conf).is_err());

        let calls = daemon.state().calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], MockCall::Check { content, .. } if content == "/srv a(ro)\n"));
    }

    #[test]
    fn health_follows_unit_states() {
        let daemon = MockDaemon::new(DaemonSpec::defaults(Protocol::Smb));
        let state = daemon.state();
        assert_eq!(daemon.health().unwrap(), Health::Active);
        state.set_unit_state("smbd", UnitState::Transitioning);
        assert_eq!(daemon.health().unwrap(), Health::Degraded);
        state.set_all_units(UnitState::Inactive);
        assert_eq!(daemon.health().unwrap(), Health::Down);

        let err = daemon
            .verify(Duration::from_millis(50), Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            DaemonError::VerifyTimeout {
                health: Health::Down,
                ..
            }
        ));
    }

    #[test]
    fn verify_succeeds_once_units_recover() {
        let daemon = MockDaemon::new(DaemonSpec::defaults(Protocol::Ftp));
        let state = daemon.state();
        state.set_all_units(UnitState::Transitioning);
        let flipper = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                state.set_all_units(UnitState::Active);
            })
        };
        daemon
            .verify(Duration::from_secs(5), Duration::from_millis(10))
            .unwrap();
        flipper.join().unwrap();
    }

    #[test]
    fn accounts_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = MockAccounts::new();
        let share = ShareDefinition::new(Protocol::Ftp, "alice", dir.path().join("alice"));
        let plan = AccountPlan::for_share(&share);

        assert!(accounts.ensure(&plan).unwrap());
        assert!(!accounts.ensure(&plan).unwrap());
        assert!(plan.upload_dir.is_dir());
        assert!(accounts.exists("alice").unwrap());
        assert_eq!(
            accounts.state().user_config("alice").as_deref(),
            Some(plan.user_config.as_str())
        );

        accounts.remove("alice").unwrap();
        assert!(!accounts.exists("alice").unwrap());
        assert!(accounts.state().user_config("alice").is_none());
        assert!(plan.home.is_dir(), "home data is kept");

        accounts.state().fail_ensures.store(1, Ordering::SeqCst);
        assert!(accounts.ensure(&plan).is_err());
        assert!(!accounts.exists("alice").unwrap());
    }
}
