pub mod apply;
pub mod backups;
pub mod doctor;
pub mod list;
pub mod prune;
pub mod recover;
pub mod remove;
pub mod status;

use indicatif::{ProgressBar, ProgressStyle};
use sharewright_core::{CoreError, ReconciliationResult, Settings, Status};
use sharewright_daemon::{check_prereqs, format_missing, Health};
use sharewright_schema::Protocol;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_REJECTED: u8 = 2;
pub const EXIT_ROLLED_BACK: u8 = 3;
pub const EXIT_FATAL: u8 = 4;

/// Set to `1` to skip the check for daemon tools before apply and remove.
pub const SKIP_PREREQS_ENV: &str = "SHAREWRIGHT_SKIP_PREREQS";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_plain(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish_plain(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish_plain(pb, format!("✗ {msg}"));
}

pub fn colorize_status(status: Status) -> String {
    use console::Style;
    let text = status.to_string();
    match status {
        Status::Committed => Style::new().green().apply_to(text).to_string(),
        Status::RolledBack => Style::new().yellow().bold().apply_to(text).to_string(),
        Status::Rejected => Style::new().red().apply_to(text).to_string(),
    }
}

pub fn colorize_health(health: Health) -> String {
    use console::Style;
    let text = health.to_string();
    match health {
        Health::Active => Style::new().green().apply_to(text).to_string(),
        Health::Degraded => Style::new().yellow().apply_to(text).to_string(),
        Health::Down => Style::new().red().bold().apply_to(text).to_string(),
    }
}

pub fn exit_code_for(status: Status) -> u8 {
    match status {
        Status::Committed => EXIT_SUCCESS,
        Status::Rejected => EXIT_REJECTED,
        Status::RolledBack => EXIT_ROLLED_BACK,
    }
}

/// `protocol` alone, or all three.
pub fn protocols(protocol: Option<Protocol>) -> Vec<Protocol> {
    protocol.map_or_else(|| Protocol::ALL.to_vec(), |p| vec![p])
}

/// Fail early when the systemd backend of `protocol` lacks its tools.
pub fn require_prereqs(settings: &Settings, protocol: Protocol) -> Result<(), String> {
    if settings.backend(protocol) != "systemd"
        || std::env::var(SKIP_PREREQS_ENV).as_deref() == Ok("1")
    {
        return Ok(());
    }
    let missing = check_prereqs(&settings.daemon_spec(protocol));
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format_missing(&missing).trim_end().to_owned())
    }
}

/// Print an apply/remove outcome and pick the exit code.
pub fn report(
    pb: Option<&ProgressBar>,
    outcome: Result<ReconciliationResult, CoreError>,
    json: bool,
) -> Result<u8, String> {
    let result = match outcome {
        Ok(result) => result,
        Err(CoreError::FatalInconsistency {
            protocol,
            name,
            reason,
        }) => {
            if let Some(pb) = pb {
                spin_fail(pb, &format!("{protocol} share '{name}': rollback failed"));
            }
            if json {
                let payload = serde_json::json!({
                    "status": "fatal_inconsistency",
                    "protocol": protocol,
                    "name": name,
                    "reason": reason,
                });
                println!("{}", json_pretty(&payload)?);
            }
            eprintln!("error: fatal inconsistency: {reason}");
            eprintln!("run `sharewright recover` once the daemon is reachable again");
            return Ok(EXIT_FATAL);
        }
        Err(e) => {
            if let Some(pb) = pb {
                spin_fail(pb, "failed");
            }
            return Err(e.to_string());
        }
    };

    let headline = format!(
        "{} {} share '{}' {}",
        result.operation,
        result.protocol,
        result.name,
        colorize_status(result.status)
    );
    if json {
        println!("{}", json_pretty(&result)?);
    } else {
        match (pb, result.is_committed()) {
            (Some(pb), true) => spin_ok(pb, &headline),
            (Some(pb), false) => spin_fail(pb, &headline),
            (None, _) => println!("{headline}"),
        }
        if !result.changed && result.is_committed() {
            println!("  no changes needed");
        }
        if let Some(reason) = &result.reason {
            println!("  {reason}");
        }
        if let Some(snapshot) = &result.snapshot {
            println!("  backup: {}", snapshot.backup_path.display());
        }
        for warning in &result.warnings {
            println!("  warning: {warning}");
        }
    }
    Ok(exit_code_for(result.status))
}
