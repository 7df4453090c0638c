//! Cascade CLI - Command-line interface
//!
//! Runs the streaming server and talks to running servers.

mod commands;

use std::path::PathBuf;

use cascade_core::tracing_setup::{CliLogLevel, init_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "Adaptive bitrate streaming server")]
#[command(version)]
struct Cli {
    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full debug log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    if let Err(e) = commands::handle_command(cli.command).await {
        if e.is_user_error() {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(2);
        }
        return Err(e.into());
    }

    Ok(())
}
