use anyhow::{Context, Result};
use std::path::PathBuf;

use pixbloom::config::Config;
use pixbloom::db::Database;
use pixbloom::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Init,
    Check,
}

struct Args {
    command: Command,
    config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        command: Command::Init,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("pixbloom {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "init" => parsed.command = Command::Init,
            "check" => parsed.command = Command::Check,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"pixbloom - photo library maintenance

USAGE:
    pixbloom [OPTIONS] [COMMAND]

COMMANDS:
    init                Create or migrate the library database (default)
    check               Report dangling or cross-owner album/image references
                        and image deletes that have not finished

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PIXBLOOM_CONFIG     Path to config file (overrides default location)
    PIXBLOOM_LOG        Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/pixbloom/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match logging::init(&config.log_dir) {
        Ok(backend) => tracing::info!(?backend, "Logging initialized"),
        Err(e) => eprintln!("Warning: logging disabled: {e:#}"),
    }

    let db = Database::open(&config.db_path, &config.database)?;
    db.initialize().context("Failed to initialize database schema")?;
    tracing::info!("Database ready at {:?}", config.db_path);

    match args.command {
        Command::Init => {
            println!("Library database ready at {}", config.db_path.display());
        }
        Command::Check => {
            let report = db.consistency_report()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.pending_deletes > 0 {
                // Finishing them needs blob storage, which only the hosting service has.
                tracing::warn!(
                    pending = report.pending_deletes,
                    "Unfinished image deletes; they complete on the service's next finish_pending_deletes pass"
                );
                eprintln!(
                    "{} image delete(s) still pending (hidden from listings)",
                    report.pending_deletes
                );
            }
            if !report.is_clean() {
                tracing::warn!(violations = report.violations(), "Library has inconsistent references");
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
