use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use filestore::{DriverRegistry, RegistryConfig};
use tracing::{debug, warn};

mod commands;

use commands::{Command, CommandError};

#[derive(Parser, Debug)]
#[command(name = "filestore", about = "Access files of any size through storage drivers")]
struct Cli {
    /// Directory of driver libraries, instead of $FILESTORE_DRIVERS_PATH
    #[arg(long, value_name = "DIR", global = true)]
    drivers_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn registry(drivers_dir: Option<PathBuf>) -> Arc<DriverRegistry> {
    let config = match drivers_dir {
        Some(dir) => RegistryConfig::with_search_dirs(vec![dir]),
        None => RegistryConfig::from_env(),
    };
    let registry = Arc::new(DriverRegistry::with_config(config));
    let report = registry.scan_drivers();
    for path in &report.loaded {
        debug!(path = %path.display(), "driver available");
    }
    for failure in &report.failures {
        warn!(error = %failure, "driver skipped");
    }
    registry
}

fn print_error_chain(error: &CommandError) {
    eprintln!("error: {error}");
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = registry(cli.drivers_dir);
    let outcome = cli.command.run(&registry);
    registry.unregister_drivers();
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error_chain(&e);
            ExitCode::FAILURE
        }
    }
}
