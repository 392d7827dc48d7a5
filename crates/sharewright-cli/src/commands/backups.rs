use super::{json_pretty, EXIT_SUCCESS};
use sharewright_core::Engine;
use sharewright_schema::Protocol;

pub fn run(engine: &Engine, protocol: Protocol, json: bool) -> Result<u8, String> {
    let snapshots = engine.backups(protocol).map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&snapshots)?);
    } else if snapshots.is_empty() {
        println!("no backups of {}", engine.config_path(protocol).display());
    } else {
        println!("backups of {}:", engine.config_path(protocol).display());
        for s in &snapshots {
            let note = if s.existed { "" } else { " (file did not exist)" };
            println!("  {}  {}{note}", s.taken_at, s.backup_path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
