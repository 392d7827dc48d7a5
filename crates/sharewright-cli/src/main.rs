mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_SUCCESS};
use sharewright_core::{install_signal_handler, Engine, Settings};
use sharewright_schema::Protocol;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "sharewright",
    version,
    about = "Transactional share reconciliation for Samba, NFS and vsftpd"
)]
struct Cli {
    /// Settings file (default: $SHAREWRIGHT_CONFIG, then /etc/sharewright/sharewright.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or update a share from a share file.
    Apply {
        /// Path to the share TOML file.
        share: PathBuf,
    },
    /// Remove a share from a protocol's config.
    Remove {
        #[arg(value_parser = parse_protocol)]
        protocol: Protocol,
        name: String,
    },
    /// List the shares present in the live configs.
    List {
        #[arg(value_parser = parse_protocol)]
        protocol: Option<Protocol>,
    },
    /// Report daemon health.
    Status {
        #[arg(value_parser = parse_protocol)]
        protocol: Option<Protocol>,
    },
    /// List config backups, newest first.
    Backups {
        #[arg(value_parser = parse_protocol)]
        protocol: Protocol,
    },
    /// Delete all but the newest backups.
    Prune {
        #[arg(value_parser = parse_protocol)]
        protocol: Protocol,
        /// Number of backups to keep.
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
    /// Roll back operations interrupted by a crash or a failed rollback.
    Recover,
    /// Check settings, state, configs and daemon tools.
    Doctor,
    /// Generate shell completions.
    Completions { shell: Shell },
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SHAREWRIGHT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    let result = match run(cli, json) {
        Ok(code) => code,
        Err(msg) => {
            eprintln!("error: {msg}");
            EXIT_FAILURE
        }
    };
    ExitCode::from(result)
}

fn run(cli: Cli, json: bool) -> Result<u8, String> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "sharewright",
            &mut std::io::stdout(),
        );
        return Ok(EXIT_SUCCESS);
    }

    let settings_path = Settings::locate(cli.config.as_deref());
    let settings = match &settings_path {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    }
    .map_err(|e| e.to_string())?;

    if matches!(cli.command, Commands::Doctor) {
        return commands::doctor::run(settings_path.as_deref(), &settings, json);
    }

    let engine = Engine::new(&settings).map_err(|e| e.to_string())?;
    install_signal_handler(engine.cancel_flag());

    match cli.command {
        Commands::Apply { share } => commands::apply::run(&engine, &settings, &share, json),
        Commands::Remove { protocol, name } => {
            commands::remove::run(&engine, &settings, protocol, &name, json)
        }
        Commands::List { protocol } => commands::list::run(&engine, protocol, json),
        Commands::Status { protocol } => commands::status::run(&engine, protocol, json),
        Commands::Backups { protocol } => commands::backups::run(&engine, protocol, json),
        Commands::Prune { protocol, keep } => {
            commands::prune::run(&engine, protocol, keep, json)
        }
        Commands::Recover => commands::recover::run(&engine, json),
        Commands::Doctor | Commands::Completions { .. } => Ok(EXIT_SUCCESS),
    }
}
