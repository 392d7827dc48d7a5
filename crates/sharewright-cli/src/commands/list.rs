use super::{json_pretty, protocols, EXIT_SUCCESS};
use sharewright_core::Engine;
use sharewright_schema::{Protocol, ShareDefinition};

pub fn run(engine: &Engine, protocol: Option<Protocol>, json: bool) -> Result<u8, String> {
    let mut shares: Vec<ShareDefinition> = Vec::new();
    for p in protocols(protocol) {
        shares.extend(engine.list(p).map_err(|e| format!("{p}: {e}"))?);
    }

    if json {
        println!("{}", json_pretty(&shares)?);
    } else if shares.is_empty() {
        println!("no shares configured");
    } else {
        println!("{:<9} {:<24} {:<6} {:<6} PATH", "PROTOCOL", "NAME", "ACCESS", "GUEST");
        for share in &shares {
            let access = if share.read_only { "ro" } else { "rw" };
            let guest = if share.guest_allowed { "yes" } else { "no" };
            println!(
                "{:<9} {:<24} {access:<6} {guest:<6} {}",
                share.protocol,
                share.name,
                share.path.display()
            );
            if share.protocol == Protocol::Nfs {
                println!("{:<9} clients: {}", "", share.allowed_clients.join(" "));
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
