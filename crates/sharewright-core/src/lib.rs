//! Reconciliation engine for Sharewright.
//!
//! This crate ties together share validation, protocol renderers, the config
//! and backup store, and daemon backends into the `Engine`: the central API
//! for applying and removing shares, listing what is configured, and checking
//! daemon health. Every mutation walks a validated state machine, holds a
//! per-protocol file lock, and is journaled so that an interrupted operation
//! is rolled back on the next start.

pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod result;
pub mod settings;

pub use concurrency::{install_signal_handler, CancelFlag, ProtocolLock};
pub use engine::{Engine, RecoveredOperation};
pub use lifecycle::{validate_transition, ReconcileState};
pub use result::{FailureReason, Operation, ReconciliationResult, Status};
pub use settings::{AccountSettings, ProtocolSettings, Settings, CONFIG_ENV, DEFAULT_CONFIG_PATH};

use sharewright_schema::Protocol;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("share definition error: {0}")]
    Schema(#[from] sharewright_schema::SchemaError),
    #[error("render error: {0}")]
    Render(#[from] sharewright_render::RenderError),
    #[error("store error: {0}")]
    Store(#[from] sharewright_store::StoreError),
    #[error("daemon error: {0}")]
    Daemon(#[from] sharewright_daemon::DaemonError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("fatal inconsistency on {protocol} share '{name}': {reason}")]
    FatalInconsistency {
        protocol: Protocol,
        name: String,
        reason: String,
    },
    #[error("invalid settings in {}: {reason}", path.display())]
    Settings { path: PathBuf, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
