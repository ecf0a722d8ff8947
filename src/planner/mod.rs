//! Encoding plan: user settings to an ordered list of jobs

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::model::{JobRequest, JobSlot, PlannedJob, PREVIEW_DURATION_SECS};

/// Highest accepted CRF value
pub const MAX_CRF: u8 = 51;
/// Constant-rate factor used when none is given
pub const DEFAULT_CRF: u8 = 28;
/// Index into `SPEED_PRESETS` used when none is given
pub const DEFAULT_SPEED: u8 = 2;
/// AV1 runs at a higher CRF for comparable quality
pub const AV1_CRF_OFFSET: u8 = 7;

/// Encoder presets per speed level, slowest first: (x265, svt-av1)
pub const SPEED_PRESETS: [(&str, &str); 6] = [
    ("slow", "4"),
    ("slow", "5"),
    ("medium", "7"),
    ("fast", "9"),
    ("veryfast", "10"),
    ("superfast", "12"),
];

/// Output codecs, in the order they are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Hevc,
    Av1,
}

impl Codec {
    pub const ALL: [Codec; 2] = [Codec::Hevc, Codec::Av1];

    /// ffmpeg encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            Codec::Hevc => "libx265",
            Codec::Av1 => "libsvtav1",
        }
    }

    /// Display slot name
    pub fn slot_name(&self) -> &'static str {
        match self {
            Codec::Hevc => "hevc",
            Codec::Av1 => "av1",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Hevc => "mp4",
            Codec::Av1 => "webm",
        }
    }

    pub fn slot(&self) -> JobSlot {
        JobSlot::new(self.slot_name())
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot_name())
    }
}

/// Settings collected from the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    /// 0..=51, lower is better quality
    pub crf: u8,
    /// Index into `SPEED_PRESETS`
    pub speed: u8,
    pub strip_audio: bool,
    /// Encode only the first few seconds
    pub preview: bool,
    pub skip_hevc: bool,
    pub skip_av1: bool,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            crf: DEFAULT_CRF,
            speed: DEFAULT_SPEED,
            strip_audio: false,
            preview: false,
            skip_hevc: false,
            skip_av1: false,
        }
    }
}

impl EncodeSettings {
    pub fn skips(&self, codec: Codec) -> bool {
        match codec {
            Codec::Hevc => self.skip_hevc,
            Codec::Av1 => self.skip_av1,
        }
    }

    fn presets(&self) -> (&'static str, &'static str) {
        let index = (self.speed as usize).min(SPEED_PRESETS.len() - 1);
        SPEED_PRESETS[index]
    }
}

/// Builds job requests for an input file
#[derive(Debug, Clone)]
pub struct JobPlanner {
    output_dir: PathBuf,
}

impl JobPlanner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// One planned job per codec, in encoding order; skipped codecs stay in
    /// the plan so their slot is still displayed
    pub fn plan(&self, input: &Path, settings: &EncodeSettings) -> Vec<PlannedJob> {
        Codec::ALL
            .iter()
            .map(|&codec| {
                PlannedJob::new(codec.slot(), self.request_for(input, codec, settings))
                    .skipped(settings.skips(codec))
            })
            .collect()
    }

    /// Encoder arguments for one codec
    pub fn request_for(&self, input: &Path, codec: Codec, settings: &EncodeSettings) -> JobRequest {
        let (x265_preset, svtav1_preset) = settings.presets();
        let crf = settings.crf.min(MAX_CRF);

        let mut request = JobRequest::new(input, self.output_path(input, codec), codec.encoder())
            .with_arg("c:v", codec.encoder());

        request = match codec {
            Codec::Hevc => request
                .with_arg("crf", crf.to_string())
                .with_arg("preset", x265_preset)
                .with_arg("movflags", "faststart")
                .with_arg("tag:v", "hvc1"),
            Codec::Av1 => request
                .with_arg("crf", (crf + AV1_CRF_OFFSET).min(63).to_string())
                .with_arg("preset", svtav1_preset)
                .with_arg("svtav1-params", "tune=0:enable-qm=1:qm-min=0:enable-tf=0"),
        };

        if settings.preview {
            request = request
                .with_arg("ss", "00:00:00")
                .with_arg("t", format_clock(PREVIEW_DURATION_SECS))
                .with_preview(PREVIEW_DURATION_SECS);
        }
        if settings.strip_audio {
            request = request.with_arg("an", "");
        }

        debug!(codec = %codec, args = ?request.encoder_args, "Planned encode");
        request
    }

    /// `<output_dir>/<input stem>.<codec extension>`
    pub fn output_path(&self, input: &Path, codec: Codec) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        self.output_dir.join(format!("{}.{}", stem, codec.extension()))
    }
}

/// Whole seconds as `HH:MM:SS`
fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}
