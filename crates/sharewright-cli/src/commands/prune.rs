use super::{json_pretty, EXIT_SUCCESS};
use sharewright_core::Engine;
use sharewright_schema::Protocol;

pub fn run(engine: &Engine, protocol: Protocol, keep: usize, json: bool) -> Result<u8, String> {
    let pruned = engine
        .prune_backups(protocol, keep)
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "protocol": protocol,
            "kept": keep,
            "pruned": pruned,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("prune: removed {} backup(s), kept up to {keep}", pruned.len());
        for s in &pruned {
            println!("  {}", s.backup_path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
