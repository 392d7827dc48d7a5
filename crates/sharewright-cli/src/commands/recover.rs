use super::{json_pretty, EXIT_FATAL, EXIT_SUCCESS};
use sharewright_core::{CoreError, Engine};

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let recovered = match engine.recover() {
        Ok(recovered) => recovered,
        Err(e @ CoreError::FatalInconsistency { .. }) => {
            eprintln!("error: {e}");
            return Ok(EXIT_FATAL);
        }
        Err(e) => return Err(e.to_string()),
    };

    if json {
        println!("{}", json_pretty(&recovered)?);
    } else if recovered.is_empty() {
        println!("journal is clean; nothing to recover");
    } else {
        for op in &recovered {
            println!(
                "rolled back interrupted {} of {} share '{}'",
                op.kind, op.protocol, op.share
            );
            for warning in &op.warnings {
                println!("  warning: {warning}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
