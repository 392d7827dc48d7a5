//! The daemons behind each share protocol.
//!
//! A [`Daemon`] validates a candidate config file, reloads the service, and
//! reports unit health. The `systemd` backend shells out to the real tools
//! with bounded timeouts; the `mock` backend keeps state in memory and lets
//! tests inject failures at every step. FTP shares additionally need an OS
//! account, handled by an [`AccountProvisioner`].

pub mod accounts;
pub mod backend;
pub mod exec;
pub mod mock;
pub mod prereq;
pub mod systemd;

pub use accounts::{select_provisioner, AccountProvisioner, SystemAccounts};
pub use backend::{
    builtin_check, select_backend, Daemon, DaemonController, DaemonSpec, DaemonValidator, Health,
    UnitState,
};
pub use exec::{run_with_timeout, CommandOutput};
pub use mock::{MockAccounts, MockCall, MockDaemon, MockState};
pub use prereq::{check_prereqs, format_missing, MissingPrereq};
pub use systemd::SystemdDaemon;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("'{command}' did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("'{command}' failed ({}): {stderr}", code.map_or_else(|| "killed".to_owned(), |c| format!("exit {c}")))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("config rejected: {0}")]
    Syntax(String),
    #[error("daemon not healthy after {timeout:?} (last seen {health})")]
    VerifyTimeout { health: Health, timeout: Duration },
    #[error("daemon backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("account error: {0}")]
    Account(String),
}
