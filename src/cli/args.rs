//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;
use clap_num::number_range;

use crate::config::FailurePolicy;
use crate::output::OutputFormat;
use crate::planner::{EncodeSettings, DEFAULT_CRF, DEFAULT_SPEED, MAX_CRF, SPEED_PRESETS};

fn crf_in_range(s: &str) -> Result<u8, String> {
    number_range(s, 0, MAX_CRF)
}

fn speed_in_range(s: &str) -> Result<u8, String> {
    number_range(s, 0, (SPEED_PRESETS.len() - 1) as u8)
}

/// Arguments for the convert command
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Input video file path
    pub input: PathBuf,

    /// Constant Rate Factor (0-51); AV1 adds 7
    #[arg(long, default_value_t = DEFAULT_CRF, value_parser = crf_in_range)]
    pub crf: u8,

    /// Encoding speed (0 slowest, 5 fastest)
    #[arg(long, default_value_t = DEFAULT_SPEED, value_parser = speed_in_range)]
    pub speed: u8,

    /// Remove audio streams
    #[arg(long)]
    pub strip_audio: bool,

    /// Encode only the first three seconds
    #[arg(long)]
    pub preview: bool,

    /// Do not produce the HEVC version
    #[arg(long)]
    pub skip_hevc: bool,

    /// Do not produce the AV1 version
    #[arg(long)]
    pub skip_av1: bool,

    /// Output directory (default: ./optimized)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// What to do after a failed encode: continue or abort
    #[arg(long)]
    pub on_failure: Option<FailurePolicy>,

    /// Progress output: console, json or quiet
    #[arg(long, default_value = "console")]
    pub format: OutputFormat,
}

impl ConvertArgs {
    pub fn settings(&self) -> EncodeSettings {
        EncodeSettings {
            crf: self.crf,
            speed: self.speed,
            strip_audio: self.strip_audio,
            preview: self.preview,
            skip_hevc: self.skip_hevc,
            skip_av1: self.skip_av1,
        }
    }
}

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Input video file path
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
