use crate::concurrency::{CancelFlag, ProtocolLock};
use crate::lifecycle::{validate_transition, ReconcileState};
use crate::result::{FailureReason, Operation, ReconciliationResult, Status};
use crate::settings::Settings;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use sharewright_daemon::{
    select_backend, select_provisioner, AccountProvisioner, Daemon, DaemonError, Health,
};
use sharewright_render::{renderer_for, AccountPlan};
use sharewright_schema::{validate_name, Protocol, ShareDefinition};
use sharewright_store::{
    BackupManager, BackupSnapshot, ConfigStore, Journal, JournalEntry, JournalOp, RollbackStep,
    StateLayout,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything the engine needs to reconcile one protocol.
struct ProtocolRuntime {
    protocol: Protocol,
    config: ConfigStore,
    backups: BackupManager,
    daemon: Box<dyn Daemon>,
    verify_timeout: Duration,
    poll_interval: Duration,
}

/// An interrupted operation rolled back by [`Engine::recover`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredOperation {
    pub op_id: String,
    pub kind: JournalOp,
    pub protocol: Protocol,
    pub share: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Side effects an apply needs besides the config document.
struct Provision {
    dir: PathBuf,
    account: Option<AccountPlan>,
    /// The account as the live config had it, re-ensured if the run rolls back.
    previous: Option<AccountPlan>,
}

/// One traversal of the reconciliation state machine.
struct Run {
    state: ReconcileState,
    result: ReconciliationResult,
    op_id: Option<String>,
    steps: Vec<RollbackStep>,
    restore_account: Option<AccountPlan>,
}

impl Run {
    fn new(operation: Operation, protocol: Protocol, name: &str) -> Self {
        Self {
            state: ReconcileState::Pending,
            result: ReconciliationResult::pending(operation, protocol, name),
            op_id: None,
            steps: Vec::new(),
            restore_account: None,
        }
    }

    fn advance(&mut self, to: ReconcileState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!(
            "{} {} '{}': {} -> {to}",
            self.result.operation, self.result.protocol, self.result.name, self.state
        );
        self.state = to;
        self.result.trace.push(to);
        Ok(())
    }

    fn finish(
        mut self,
        terminal: ReconcileState,
        reason: Option<FailureReason>,
    ) -> Result<ReconciliationResult, CoreError> {
        self.advance(terminal)?;
        self.result.status = match terminal {
            ReconcileState::Committed => Status::Committed,
            ReconcileState::RolledBack => Status::RolledBack,
            _ => Status::Rejected,
        };
        if let Some(reason) = &reason {
            warn!(
                "{} {} '{}' {}: {reason}",
                self.result.operation, self.result.protocol, self.result.name, self.result.status
            );
        } else {
            info!(
                "{} {} '{}' committed{}",
                self.result.operation,
                self.result.protocol,
                self.result.name,
                if self.result.changed { "" } else { " (unchanged)" }
            );
        }
        self.result.reason = reason;
        Ok(self.result)
    }

    fn reject(self, reason: FailureReason) -> Result<ReconciliationResult, CoreError> {
        self.finish(ReconcileState::Rejected, Some(reason))
    }
}

/// Central reconciliation engine.
///
/// Applies and removes shares by editing the daemons' native config files
/// through a validated state machine: validate, back up, write, let the
/// daemon check the candidate, reload, verify health, and roll back on any
/// failure after the backup.
pub struct Engine {
    layout: StateLayout,
    journal: Journal,
    smb: ProtocolRuntime,
    nfs: ProtocolRuntime,
    ftp: ProtocolRuntime,
    accounts: Box<dyn AccountProvisioner>,
    cancel: CancelFlag,
}

impl Engine {
    /// Create an engine with the backends named in `settings`.
    ///
    /// Incomplete journal entries from previous runs are rolled back for
    /// every protocol whose lock is free.
    pub fn new(settings: &Settings) -> Result<Self, CoreError> {
        Self::with_backends(settings, BTreeMap::new(), None)
    }

    /// Like [`new`](Self::new), with daemon backends and the account
    /// provisioner supplied by the caller. Protocols missing from `daemons`
    /// use the backend named in `settings`.
    pub fn with_backends(
        settings: &Settings,
        mut daemons: BTreeMap<Protocol, Box<dyn Daemon>>,
        accounts: Option<Box<dyn AccountProvisioner>>,
    ) -> Result<Self, CoreError> {
        let layout = StateLayout::new(&settings.state_dir);
        layout.initialize()?;
        let journal = Journal::new(&layout);
        journal.initialize()?;

        let mut runtime = |protocol: Protocol| -> Result<ProtocolRuntime, CoreError> {
            let spec = settings.daemon_spec(protocol);
            let daemon = match daemons.remove(&protocol) {
                Some(daemon) => daemon,
                None => select_backend(settings.backend(protocol), spec.clone())?,
            };
            debug!("{protocol}: {} backend", daemon.name());
            Ok(ProtocolRuntime {
                protocol,
                config: ConfigStore::new(settings.config_path(protocol)),
                backups: settings.backup_manager(protocol),
                daemon,
                verify_timeout: spec.verify_timeout,
                poll_interval: spec.poll_interval,
            })
        };
        let smb = runtime(Protocol::Smb)?;
        let nfs = runtime(Protocol::Nfs)?;
        let ftp = runtime(Protocol::Ftp)?;

        let accounts = match accounts {
            Some(accounts) => accounts,
            None => select_provisioner(
                &settings.accounts.backend,
                &settings.accounts.shell,
                &settings.accounts.user_config_dir,
            )?,
        };

        let engine = Self {
            layout,
            journal,
            smb,
            nfs,
            ftp,
            accounts,
            cancel: CancelFlag::new(),
        };

        // Recovery mutates config files; skip protocols another process holds.
        for protocol in Protocol::ALL {
            match ProtocolLock::try_acquire(&engine.layout.lock_file(protocol)) {
                Ok(Some(_lock)) => {
                    if let Err(e) = engine.recover_locked(protocol) {
                        error!("{protocol} journal recovery failed: {e}");
                    }
                }
                Ok(None) => debug!("{protocol} lock held; skipping journal recovery"),
                Err(e) => warn!("{protocol} lock check failed; skipping journal recovery: {e}"),
            }
        }

        Ok(engine)
    }

    /// The flag checked before each operation's backup. Pass it to
    /// [`install_signal_handler`](crate::install_signal_handler) to route Ctrl-C.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn state_layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn config_path(&self, protocol: Protocol) -> &Path {
        self.runtime(protocol).config.path()
    }

    pub fn backend_name(&self, protocol: Protocol) -> &str {
        self.runtime(protocol).daemon.name()
    }

    fn runtime(&self, protocol: Protocol) -> &ProtocolRuntime {
        match protocol {
            Protocol::Smb => &self.smb,
            Protocol::Nfs => &self.nfs,
            Protocol::Ftp => &self.ftp,
        }
    }

    fn lock(&self, protocol: Protocol) -> Result<ProtocolLock, CoreError> {
        ProtocolLock::acquire(&self.layout.lock_file(protocol))
    }

    /// Create or update a share.
    pub fn apply(&self, share: &ShareDefinition) -> Result<ReconciliationResult, CoreError> {
        let protocol = share.protocol;
        info!("applying {protocol} share '{}'", share.name);
        let mut run = Run::new(Operation::Apply, protocol, &share.name);
        run.advance(ReconcileState::Validating)?;

        let renderer = renderer_for(protocol);
        let fragment = match renderer.render(share) {
            Ok(fragment) => fragment,
            Err(e) => return run.reject(FailureReason::Validation(e.to_string())),
        };
        let rt = self.runtime(protocol);
        let _lock = self.lock(protocol)?;
        let live = rt.config.read_or_empty()?;
        let candidate = renderer.upsert(&live, &fragment);

        let previous = match &fragment.account {
            Some(_) => renderer
                .parse(&live)
                .ok()
                .and_then(|shares| shares.into_iter().find(|s| s.name == fragment.name))
                .map(|s| AccountPlan::for_share(&s)),
            None => None,
        };
        let provision = Provision {
            dir: share.path.clone(),
            account: fragment.account.clone(),
            previous,
        };

        if candidate == live {
            run.result.warnings = self.ensure_unchanged(&provision);
            return run.finish(ReconcileState::Committed, None);
        }
        self.reconcile(run, rt, &candidate, Some(&provision))
    }

    /// Remove a share. Removing an absent share commits without changes.
    pub fn remove(&self, protocol: Protocol, name: &str) -> Result<ReconciliationResult, CoreError> {
        info!("removing {protocol} share '{name}'");
        let mut run = Run::new(Operation::Remove, protocol, name);
        run.advance(ReconcileState::Validating)?;

        if let Err(e) = validate_name(protocol, name) {
            return run.reject(FailureReason::Validation(e.to_string()));
        }

        let rt = self.runtime(protocol);
        let _lock = self.lock(protocol)?;
        let live = rt.config.read_or_empty()?;
        let candidate = renderer_for(protocol).remove(&live, name);

        if candidate == live {
            return run.finish(ReconcileState::Committed, None);
        }
        let mut result = self.reconcile(run, rt, &candidate, None)?;

        // The account goes once its allow-list entry is gone; its home stays.
        if protocol == Protocol::Ftp && result.is_committed() {
            if let Err(e) = self.accounts.remove(name) {
                warn!("FTP share '{name}' removed but its account was not: {e}");
                result
                    .warnings
                    .push(format!("account '{name}' could not be removed: {e}"));
            }
        }
        Ok(result)
    }

    /// Shares currently present in the protocol's config file.
    pub fn list(&self, protocol: Protocol) -> Result<Vec<ShareDefinition>, CoreError> {
        let document = self.runtime(protocol).config.read_or_empty()?;
        Ok(renderer_for(protocol).parse(&document)?)
    }

    pub fn status(&self, protocol: Protocol) -> Result<Health, CoreError> {
        Ok(self.runtime(protocol).daemon.health()?)
    }

    /// Backups of the protocol's config file, newest first.
    pub fn backups(&self, protocol: Protocol) -> Result<Vec<BackupSnapshot>, CoreError> {
        let rt = self.runtime(protocol);
        Ok(rt.backups.list(rt.config.path())?)
    }

    /// Delete all but the newest `keep` backups. Returns the deleted ones.
    pub fn prune_backups(
        &self,
        protocol: Protocol,
        keep: usize,
    ) -> Result<Vec<BackupSnapshot>, CoreError> {
        let rt = self.runtime(protocol);
        let _lock = self.lock(protocol)?;
        let pruned = rt.backups.prune(rt.config.path(), keep)?;
        info!("{protocol}: pruned {} backup(s), kept {keep}", pruned.len());
        Ok(pruned)
    }

    /// Roll back every interrupted operation, waiting for each protocol's lock.
    pub fn recover(&self) -> Result<Vec<RecoveredOperation>, CoreError> {
        let mut recovered = Vec::new();
        for protocol in Protocol::ALL {
            let _lock = self.lock(protocol)?;
            recovered.extend(self.recover_locked(protocol)?);
        }
        Ok(recovered)
    }

    fn recover_locked(&self, protocol: Protocol) -> Result<Vec<RecoveredOperation>, CoreError> {
        let entries = self.journal.incomplete_for(protocol)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let rt = self.runtime(protocol);
        let mut recovered = Vec::with_capacity(entries.len());

        // Newest first, so that each restore lands on the state the next
        // older entry saw.
        for entry in entries.into_iter().rev() {
            warn!(
                "rolling back interrupted {} of {protocol} share '{}' (op_id={})",
                entry.kind, entry.share, entry.op_id
            );
            let warnings = self
                .undo(rt, &entry.rollback_steps, true)
                .map_err(|reason| fatal(&entry, reason))?;
            self.journal.commit(&entry.op_id)?;
            recovered.push(RecoveredOperation {
                op_id: entry.op_id,
                kind: entry.kind,
                protocol,
                share: entry.share,
                warnings,
            });
        }

        if let Err(e) = rt.daemon.reload() {
            warn!("{protocol}: reload after recovery failed: {e}");
        }
        Ok(recovered)
    }

    /// Re-establish the directory and account of a share whose config is
    /// already in place. Problems are returned as warnings.
    fn ensure_unchanged(&self, provision: &Provision) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Err(e) = fs::create_dir_all(&provision.dir) {
            warnings.push(format!(
                "share directory {} could not be created: {e}",
                provision.dir.display()
            ));
        }
        if let Some(plan) = &provision.account {
            if let Err(e) = self.accounts.ensure(plan) {
                warnings.push(format!("account '{}' could not be ensured: {e}", plan.username));
            }
        }
        warnings
    }

    fn record(&self, run: &mut Run, step: RollbackStep) -> Result<(), CoreError> {
        if let Some(op_id) = &run.op_id {
            self.journal.add_rollback_step(op_id, step.clone())?;
        }
        run.steps.push(step);
        Ok(())
    }

    /// Create the share directory and FTP account, journaling each one
    /// before it exists.
    fn provision(&self, run: &mut Run, provision: &Provision) -> Result<(), FailureReason> {
        let journal_err = |e: CoreError| FailureReason::Write(e.to_string());

        if !provision.dir.exists() {
            self.record(run, RollbackStep::RemoveDir(provision.dir.clone()))
                .map_err(journal_err)?;
            fs::create_dir_all(&provision.dir).map_err(|e| {
                FailureReason::Write(format!("creating {}: {e}", provision.dir.display()))
            })?;
            debug!("created share directory {}", provision.dir.display());
        }

        if let Some(plan) = &provision.account {
            let exists = self
                .accounts
                .exists(&plan.username)
                .map_err(|e| FailureReason::Provision(e.to_string()))?;
            if exists {
                run.restore_account = provision.previous.clone();
            } else {
                self.record(run, RollbackStep::RemoveAccount(plan.username.clone()))
                    .map_err(journal_err)?;
            }
            self.accounts
                .ensure(plan)
                .map_err(|e| FailureReason::Provision(e.to_string()))?;
        }
        Ok(())
    }

    /// Drive a changed document from backup to a terminal state.
    fn reconcile(
        &self,
        mut run: Run,
        rt: &ProtocolRuntime,
        candidate: &str,
        provision: Option<&Provision>,
    ) -> Result<ReconciliationResult, CoreError> {
        run.result.changed = true;

        if self.cancel.is_cancelled() {
            return run.reject(FailureReason::Cancelled);
        }

        let snapshot = match rt.backups.snapshot(rt.config.path()) {
            Ok(snapshot) => snapshot,
            Err(e) => return run.reject(FailureReason::Write(format!("backup failed: {e}"))),
        };
        run.result.snapshot = Some(snapshot.clone());
        run.op_id = Some(self.journal.begin(
            run.result.operation.into(),
            rt.protocol,
            &run.result.name,
        )?);
        self.record(&mut run, RollbackStep::RestoreSnapshot(snapshot))?;
        run.advance(ReconcileState::BackedUp)?;

        if let Some(provision) = provision {
            if let Err(reason) = self.provision(&mut run, provision) {
                let terminal = match reason {
                    FailureReason::Provision(_) => ReconcileState::RolledBack,
                    _ => ReconcileState::Rejected,
                };
                return self.roll_back(run, rt, terminal, reason, false, false);
            }
        }

        if let Err(e) = rt.config.write(candidate.as_bytes()) {
            return self.roll_back(
                run,
                rt,
                ReconcileState::Rejected,
                FailureReason::Write(e.to_string()),
                false,
                false,
            );
        }
        run.advance(ReconcileState::Written)?;

        run.advance(ReconcileState::DaemonValidating)?;
        if let Err(e) = rt.daemon.check(rt.config.path()) {
            let reason = FailureReason::DaemonSyntax(e.to_string());
            return self.roll_back(run, rt, ReconcileState::RolledBack, reason, true, false);
        }

        run.advance(ReconcileState::Reloading)?;
        if let Err(e) = rt.daemon.reload() {
            let reason = FailureReason::Reload(e.to_string());
            return self.roll_back(run, rt, ReconcileState::RolledBack, reason, true, true);
        }

        run.advance(ReconcileState::Verifying)?;
        if let Err(e) = rt.daemon.verify(rt.verify_timeout, rt.poll_interval) {
            let reason = match e {
                DaemonError::VerifyTimeout { .. } => FailureReason::VerifyTimeout(e.to_string()),
                other => FailureReason::Reload(other.to_string()),
            };
            return self.roll_back(run, rt, ReconcileState::RolledBack, reason, true, true);
        }

        if let Some(op_id) = &run.op_id {
            self.journal.commit(op_id)?;
        }
        run.finish(ReconcileState::Committed, None)
    }

    /// Undo a failed run and settle it in `terminal`.
    ///
    /// `restore_config` is false when the config file was never written;
    /// `reload` re-reloads the daemon once the old file is back.
    fn roll_back(
        &self,
        mut run: Run,
        rt: &ProtocolRuntime,
        terminal: ReconcileState,
        reason: FailureReason,
        restore_config: bool,
        reload: bool,
    ) -> Result<ReconciliationResult, CoreError> {
        warn!(
            "{} {} '{}' failed ({reason}); rolling back",
            run.result.operation, rt.protocol, run.result.name
        );

        let outcome = self.undo(rt, &run.steps, restore_config).and_then(|warnings| {
            if reload {
                rt.daemon
                    .reload()
                    .map_err(|e| format!("reload after restore failed: {e}"))?;
            }
            Ok(warnings)
        });

        match outcome {
            Ok(mut warnings) => {
                if let Some(plan) = run.restore_account.take() {
                    if let Err(e) = self.accounts.ensure(&plan) {
                        let warning =
                            format!("account '{}' settings could not be restored: {e}", plan.username);
                        warn!("{}: {warning}", rt.protocol);
                        warnings.push(warning);
                    }
                }
                if let Some(op_id) = &run.op_id {
                    self.journal.commit(op_id)?;
                }
                run.result.warnings.extend(warnings);
                run.finish(terminal, Some(reason))
            }
            Err(inconsistency) => {
                // The journal entry stays so that `recover` can retry.
                error!(
                    "{} {} '{}': rollback failed, config and daemon may disagree: {inconsistency}",
                    run.result.operation, rt.protocol, run.result.name
                );
                Err(CoreError::FatalInconsistency {
                    protocol: rt.protocol,
                    name: run.result.name,
                    reason: format!("{reason}; then {inconsistency}"),
                })
            }
        }
    }

    /// Replay rollback steps newest first. A failed config restore is fatal
    /// and returned as `Err`; other failures become warnings.
    fn undo(
        &self,
        rt: &ProtocolRuntime,
        steps: &[RollbackStep],
        restore_config: bool,
    ) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        for step in steps.iter().rev() {
            match step {
                RollbackStep::RestoreSnapshot(snapshot) => {
                    if restore_config {
                        rt.backups
                            .restore(snapshot)
                            .map_err(|e| format!("restoring {}: {e}", snapshot.source.display()))?;
                    }
                }
                RollbackStep::RemoveDir(dir) => match fs::remove_dir_all(dir) {
                    Ok(()) => debug!("removed {}", dir.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warnings.push(format!("could not remove {}: {e}", dir.display())),
                },
                RollbackStep::RemoveAccount(username) => {
                    if let Err(e) = self.accounts.remove(username) {
                        warnings.push(format!("could not remove account '{username}': {e}"));
                    }
                }
            }
        }
        for warning in &warnings {
            warn!("{}: {warning}", rt.protocol);
        }
        Ok(warnings)
    }
}

fn fatal(entry: &JournalEntry, reason: String) -> CoreError {
    error!(
        "recovery of {} {} '{}' failed: {reason}",
        entry.kind, entry.protocol, entry.share
    );
    CoreError::FatalInconsistency {
        protocol: entry.protocol,
        name: entry.share.clone(),
        reason,
    }
}
