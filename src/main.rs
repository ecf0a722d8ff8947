//! webvids
//!
//! Optimizes a video for the web by encoding an HEVC and an AV1 version of
//! it, one after the other, with a live progress bar per encode.
//!
//! # Usage
//!
//! ```bash
//! webvids convert holiday.mov
//! webvids convert holiday.mov --crf 24 --speed 4 --strip-audio
//! webvids convert holiday.mov --preview --skip-av1 --format json
//! webvids probe holiday.mov --json
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use webvids_cli::cli::{commands, Cli, Commands};
use webvids_cli::config::AppConfig;
use webvids_cli::utils::init_logging;
use webvids_cli::RunOutcome;

/// Main entry point for the webvids CLI application
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_format);
    info!("Starting webvids");

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Execute the requested command
    match cli.command {
        Commands::Convert(args) => {
            info!("Executing convert command");
            match commands::convert(args, config).await? {
                RunOutcome::Aborted(reason) => bail!("Conversion aborted: {}", reason),
                RunOutcome::Cancelled => info!("Conversion cancelled"),
                RunOutcome::Completed { succeeded, failed } => {
                    info!(succeeded, failed, "Conversion finished")
                }
            }
        }
        Commands::Probe(args) => {
            info!("Executing probe command");
            commands::probe(args, &config).await?;
        }
    }

    info!("webvids completed successfully");
    Ok(())
}
