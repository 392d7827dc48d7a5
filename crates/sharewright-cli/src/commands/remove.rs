use super::{report, require_prereqs, spinner, EXIT_FAILURE};
use sharewright_core::{Engine, Settings};
use sharewright_schema::Protocol;

pub fn run(
    engine: &Engine,
    settings: &Settings,
    protocol: Protocol,
    name: &str,
    json: bool,
) -> Result<u8, String> {
    if let Err(msg) = require_prereqs(settings, protocol) {
        eprintln!("error: {msg}");
        return Ok(EXIT_FAILURE);
    }

    let pb = (!json).then(|| spinner(&format!("removing {protocol} share '{name}'...")));
    report(pb.as_ref(), engine.remove(protocol, name), json)
}
