//! CLI module for webvids
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::utils::LogFormat;

pub mod args;
pub mod commands;

pub use args::{ConvertArgs, ProbeArgs};

/// webvids
///
/// Encodes a video into web-friendly HEVC and AV1 versions, one after the
/// other, with live progress for each encode.
#[derive(Parser, Debug)]
#[command(name = "webvids")]
#[command(about = "Optimize videos for the web with HEVC and AV1 encodes")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (overridden by RUST_LOG)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Configuration file (default: ./webvids.toml when present)
    #[arg(long, global = true, env = "WEBVIDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode a video into every enabled codec
    Convert(ConvertArgs),
    /// Show duration, frame size and the planned downscale of a video
    Probe(ProbeArgs),
}
