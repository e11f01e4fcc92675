//! Mount a filesystem whose files count how often they are read.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, error};

mod app_config;
mod daemon;
mod fuse_check;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "An in-memory filesystem of read counters.")]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a countfs config TOML."
    )]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the filesystem in the foreground until interrupted.
    Run,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    Trc::default().init().unwrap_or_else(|e| {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    });

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            if let Err(e) = fuse_check::ensure_fuse() {
                error!("{e}");
                std::process::exit(1);
            }

            debug!(config = ?config, "Starting with configuration...");
            if let Err(e) = daemon::spawn(config) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
