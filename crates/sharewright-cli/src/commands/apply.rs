use super::{json_pretty, report, require_prereqs, spinner, EXIT_FAILURE, EXIT_REJECTED};
use sharewright_core::{Engine, Settings};
use sharewright_schema::{parse_share_file, SchemaError};
use std::path::Path;

pub fn run(
    engine: &Engine,
    settings: &Settings,
    share_file: &Path,
    json: bool,
) -> Result<u8, String> {
    let share = match parse_share_file(share_file) {
        Ok(share) => share,
        Err(SchemaError::Io(e)) => {
            return Err(format!("failed to read {}: {e}", share_file.display()));
        }
        Err(e) => {
            if json {
                let payload = serde_json::json!({
                    "status": "rejected",
                    "reason": { "kind": "validation", "detail": e.to_string() },
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                eprintln!("rejected: {}: {e}", share_file.display());
            }
            return Ok(EXIT_REJECTED);
        }
    };

    if let Err(msg) = require_prereqs(settings, share.protocol) {
        eprintln!("error: {msg}");
        return Ok(EXIT_FAILURE);
    }

    let pb = (!json).then(|| {
        spinner(&format!(
            "applying {} share '{}'...",
            share.protocol, share.name
        ))
    });
    report(pb.as_ref(), engine.apply(&share), json)
}
