use super::{colorize_health, json_pretty, protocols, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;
use sharewright_core::Engine;
use sharewright_daemon::Health;
use sharewright_schema::Protocol;
use std::path::PathBuf;

#[derive(Serialize)]
struct Row {
    protocol: Protocol,
    backend: String,
    config_path: PathBuf,
    health: Health,
}

/// Exits non-zero unless every requested daemon is fully active.
pub fn run(engine: &Engine, protocol: Option<Protocol>, json: bool) -> Result<u8, String> {
    let mut rows = Vec::new();
    for p in protocols(protocol) {
        rows.push(Row {
            protocol: p,
            backend: engine.backend_name(p).to_owned(),
            config_path: engine.config_path(p).to_path_buf(),
            health: engine.status(p).map_err(|e| format!("{p}: {e}"))?,
        });
    }

    if json {
        println!("{}", json_pretty(&rows)?);
    } else {
        for row in &rows {
            println!(
                "{:<4} {:<9} {} ({})",
                row.protocol,
                colorize_health(row.health),
                row.config_path.display(),
                row.backend
            );
        }
    }

    if rows.iter().all(|r| r.health == Health::Active) {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
