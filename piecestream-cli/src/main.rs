//! Piecestream CLI - Command-line interface
//!
//! Runs the demuxer against the simulated engine and writes every stream to
//! disk as it arrives.

mod commands;
mod file_output;

use anyhow::Context;
use clap::Parser;
use piecestream_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "piecestream")]
#[command(about = "Stream the files of an archive while its pieces download")]
struct Cli {
    /// Console log level; the full trace always goes to logs/
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)
        .context("Failed to initialize tracing")?;

    commands::handle_command(cli.command).await
}
