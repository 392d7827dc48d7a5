use crate::lifecycle::ReconcileState;
use serde::{Deserialize, Serialize};
use sharewright_schema::Protocol;
use sharewright_store::{BackupSnapshot, JournalOp};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Committed,
    RolledBack,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Committed => write!(f, "committed"),
            Status::RolledBack => write!(f, "rolled back"),
            Status::Rejected => write!(f, "rejected"),
        }
    }
}

/// Why an operation did not commit. Each variant carries the diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Validation(String),
    Write(String),
    DaemonSyntax(String),
    Reload(String),
    VerifyTimeout(String),
    Provision(String),
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Validation(d) => write!(f, "validation failed: {d}"),
            FailureReason::Write(d) => write!(f, "write failed: {d}"),
            FailureReason::DaemonSyntax(d) => write!(f, "daemon rejected the config: {d}"),
            FailureReason::Reload(d) => write!(f, "reload failed: {d}"),
            FailureReason::VerifyTimeout(d) => write!(f, "daemon did not become healthy: {d}"),
            FailureReason::Provision(d) => write!(f, "account provisioning failed: {d}"),
            FailureReason::Cancelled => write!(f, "cancelled before any change was made"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Apply,
    Remove,
}

impl From<Operation> for JournalOp {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Apply => JournalOp::Apply,
            Operation::Remove => JournalOp::Remove,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        JournalOp::from(*self).fmt(f)
    }
}

/// Outcome of one apply or remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub protocol: Protocol,
    pub name: String,
    pub operation: Operation,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Backup taken before the config file was touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<BackupSnapshot>,
    /// Whether the config document differed from the request.
    pub changed: bool,
    /// States visited, in order.
    pub trace: Vec<ReconcileState>,
    /// Non-fatal problems noticed after the outcome was settled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ReconciliationResult {
    pub(crate) fn pending(operation: Operation, protocol: Protocol, name: &str) -> Self {
        Self {
            protocol,
            name: name.to_owned(),
            operation,
            status: Status::Rejected,
            reason: None,
            snapshot: None,
            changed: false,
            trace: vec![ReconcileState::Pending],
            warnings: Vec::new(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == Status::Committed
    }

    pub fn final_state(&self) -> ReconcileState {
        self.trace
            .last()
            .copied()
            .unwrap_or(ReconcileState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_serializes_tagged() {
        let json = serde_json::to_value(FailureReason::DaemonSyntax("bad key".to_owned())).unwrap();
        assert_eq!(json["kind"], "daemon_syntax");
        assert_eq!(json["detail"], "bad key");

        let json = serde_json::to_value(FailureReason::Cancelled).unwrap();
        assert_eq!(json["kind"], "cancelled");
    }

    #[test]
    fn result_json_omits_empty_fields() {
        let mut result = ReconciliationResult::pending(Operation::Apply, Protocol::Smb, "docs");
        result.status = Status::Committed;
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "committed");
        assert_eq!(json["operation"], "apply");
        assert_eq!(json["trace"][0], "pending");
        assert!(json.get("reason").is_none());
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn operation_display_matches_journal() {
        assert_eq!(Operation::Apply.to_string(), "apply");
        assert_eq!(JournalOp::from(Operation::Remove), JournalOp::Remove);
    }
}
