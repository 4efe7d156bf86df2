//! Shoal CLI - Command-line interface
//!
//! Inspects torrents, talks to trackers and peers, and downloads content.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "A BitTorrent peer-wire downloader")]
struct Cli {
    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value_t = CliLogLevel::default(), global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run debug log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to initialize logging")?;

    if let Err(e) = commands::handle_command(cli.command).await {
        tracing::error!("Command failed: {e}");
        eprintln!("Error: {}", e.user_message());
        eprintln!("Full log: {}", log_path.display());
        std::process::exit(1);
    }

    Ok(())
}
