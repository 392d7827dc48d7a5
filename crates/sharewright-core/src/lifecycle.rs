use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of one apply or remove traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Pending,
    Validating,
    BackedUp,
    Written,
    DaemonValidating,
    Reloading,
    Verifying,
    Committed,
    RolledBack,
    Rejected,
}

impl ReconcileState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReconcileState::Committed | ReconcileState::RolledBack | ReconcileState::Rejected
        )
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileState::Pending => "pending",
            ReconcileState::Validating => "validating",
            ReconcileState::BackedUp => "backed_up",
            ReconcileState::Written => "written",
            ReconcileState::DaemonValidating => "daemon_validating",
            ReconcileState::Reloading => "reloading",
            ReconcileState::Verifying => "verifying",
            ReconcileState::Committed => "committed",
            ReconcileState::RolledBack => "rolled_back",
            ReconcileState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: ReconcileState, to: ReconcileState) -> Result<(), CoreError> {
    use ReconcileState::{
        BackedUp, Committed, DaemonValidating, Pending, Rejected, Reloading, RolledBack,
        Validating, Verifying, Written,
    };

    let valid = matches!(
        (from, to),
        (Pending, Validating)
            // Committed here means the document is already as requested.
            | (Validating, BackedUp | Committed | Rejected)
            | (BackedUp, Written | RolledBack | Rejected)
            | (Written, DaemonValidating)
            | (DaemonValidating, Reloading | RolledBack)
            | (Reloading, Verifying | RolledBack)
            | (Verifying, Committed | RolledBack)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReconcileState::{
        BackedUp, Committed, DaemonValidating, Pending, Rejected, Reloading, RolledBack,
        Validating, Verifying, Written,
    };

    #[test]
    fn happy_path_is_valid() {
        let path = [
            Pending,
            Validating,
            BackedUp,
            Written,
            DaemonValidating,
            Reloading,
            Verifying,
            Committed,
        ];
        for pair in path.windows(2) {
            assert!(
                validate_transition(pair[0], pair[1]).is_ok(),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn failure_exits() {
        assert!(validate_transition(Validating, Rejected).is_ok());
        assert!(validate_transition(Validating, Committed).is_ok()); // unchanged document
        assert!(validate_transition(BackedUp, Rejected).is_ok()); // write failed
        assert!(validate_transition(BackedUp, RolledBack).is_ok()); // provisioning failed
        assert!(validate_transition(DaemonValidating, RolledBack).is_ok());
        assert!(validate_transition(Reloading, RolledBack).is_ok());
        assert!(validate_transition(Verifying, RolledBack).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Pending, Written).is_err());
        assert!(validate_transition(Validating, Reloading).is_err());
        assert!(validate_transition(Written, Committed).is_err());
        assert!(validate_transition(Reloading, Rejected).is_err());
        assert!(validate_transition(Committed, Validating).is_err());
        assert!(validate_transition(RolledBack, Committed).is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(Committed.is_terminal());
        assert!(RolledBack.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!Verifying.is_terminal());
    }

    #[test]
    fn error_names_both_states() {
        let err = validate_transition(Pending, Committed).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("pending"));
        assert!(msg.contains("committed"));
    }
}
