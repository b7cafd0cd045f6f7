//! Nyx debug adapter
//!
//! Editors start this binary and talk the Debug Adapter Protocol to it; the
//! adapter launches or attaches to the Nyx runtime and relays between the two.

use std::path::PathBuf;

use clap::Parser;
use nyx_dap::bridge;
use nyx_dap::commands::Commands;
use nyx_dap::common::{config::Config, logging, Result};

#[derive(Parser)]
#[command(name = "nyx-dap", about = "Debug adapter for the Nyx runtime")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Nyx runtime executable, overrides the configuration file
    #[arg(long, global = true)]
    runtime: Option<PathBuf>,

    /// Log file (default: the platform data directory)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(runtime) = &cli.runtime {
        config.runtime.binary = runtime.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (log_path, guard) = logging::init(cli.log_file.as_deref());
    if let Some(path) = &log_path {
        tracing::debug!(path = %path.display(), "Logging to file");
    }

    let command = cli.command.clone().unwrap_or(Commands::Serve);
    let result = match load_config(&cli) {
        Ok(config) => bridge::run(config, command.mode()).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("Error: {e}");
            1
        }
    };

    // A blocked stdin read would otherwise keep the runtime from shutting down
    drop(guard);
    std::process::exit(code);
}
