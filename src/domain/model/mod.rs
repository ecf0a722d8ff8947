// Domain models - Core types and data structures

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{WebvidsError, WebvidsResult};

/// Length of a preview encode in seconds
pub const PREVIEW_DURATION_SECS: f64 = 3.0;

/// Identifier carried on every message that belongs to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Display slot of a job, e.g. "hevc" or "av1"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobSlot(pub String);

impl JobSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// One encoding of one input with one codec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Source media
    pub input_path: PathBuf,
    /// Encoded file to write (overwritten if present)
    pub output_path: PathBuf,
    /// Encoder name, e.g. "libx265"
    pub codec_id: String,
    /// Output options without the leading dash; an empty value is a bare flag
    pub encoder_args: BTreeMap<String, String>,
    /// Set for bounded preview encodes
    pub preview_seconds: Option<f64>,
}

impl JobRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        codec_id: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            codec_id: codec_id.into(),
            encoder_args: BTreeMap::new(),
            preview_seconds: None,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.encoder_args.insert(key.into(), value.into());
        self
    }

    pub fn with_preview(mut self, seconds: f64) -> Self {
        self.preview_seconds = Some(seconds);
        self
    }
}

/// Metadata of a source file, probed once per input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeMetadata {
    /// Container duration; zero when the prober could not report one
    pub duration_seconds: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ProbeMetadata {
    pub fn new(duration_seconds: f64, width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            duration_seconds,
            width,
            height,
        }
    }

    /// Frame size, when both dimensions are known and non-zero
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Duration that progress fractions are measured against
    pub fn total_duration(&self, preview_seconds: Option<f64>) -> WebvidsResult<f64> {
        if let Some(preview) = preview_seconds.filter(|p| p.is_finite() && *p > 0.0) {
            return Ok(preview);
        }

        if self.duration_seconds.is_finite() && self.duration_seconds > 0.0 {
            Ok(self.duration_seconds)
        } else {
            Err(WebvidsError::probe(format!(
                "input reports no usable duration ({})",
                self.duration_seconds
            )))
        }
    }
}

/// Completion fraction reported by a job's progress channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub job_id: JobId,
    pub fraction: f64,
}

/// Lifecycle of a job inside the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// What stage a job failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Probe,
    Spawn,
    ChannelBind,
    Subprocess,
    Io,
}

/// Failure detail carried to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl From<&WebvidsError> for JobFailure {
    fn from(err: &WebvidsError) -> Self {
        let kind = match err {
            WebvidsError::ProbeError { .. } | WebvidsError::InputFileNotFound { .. } => {
                FailureKind::Probe
            }
            WebvidsError::SpawnError { .. } => FailureKind::Spawn,
            WebvidsError::ChannelBindError { .. } => FailureKind::ChannelBind,
            WebvidsError::SubprocessFailure { .. } => FailureKind::Subprocess,
            WebvidsError::ConfigError { .. } | WebvidsError::IoError(_) => FailureKind::Io,
        };
        Self {
            kind,
            detail: err.to_string(),
        }
    }
}

impl From<WebvidsError> for JobFailure {
    fn from(err: WebvidsError) -> Self {
        JobFailure::from(&err)
    }
}

/// Terminal status of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    Succeeded,
    Failed(JobFailure),
    Cancelled,
}

/// Result handed from the runner to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: TerminalStatus,
}

impl JobResult {
    pub fn succeeded(job_id: JobId) -> Self {
        Self {
            job_id,
            status: TerminalStatus::Succeeded,
        }
    }

    pub fn failed(job_id: JobId, failure: impl Into<JobFailure>) -> Self {
        Self {
            job_id,
            status: TerminalStatus::Failed(failure.into()),
        }
    }

    pub fn cancelled(job_id: JobId) -> Self {
        Self {
            job_id,
            status: TerminalStatus::Cancelled,
        }
    }

    pub fn state(&self) -> JobState {
        match self.status {
            TerminalStatus::Succeeded => JobState::Succeeded,
            TerminalStatus::Failed(_) => JobState::Failed,
            TerminalStatus::Cancelled => JobState::Cancelled,
        }
    }
}

/// A job in the run plan, in the order it should execute
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedJob {
    pub slot: JobSlot,
    pub request: JobRequest,
    pub skipped: bool,
}

impl PlannedJob {
    pub fn new(slot: JobSlot, request: JobRequest) -> Self {
        Self {
            slot,
            request,
            skipped: false,
        }
    }

    pub fn skipped(mut self, skipped: bool) -> Self {
        self.skipped = skipped;
        self
    }
}

/// Top-level phase of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SelectingFile,
    Configuring,
    /// Index into the run plan of the active job
    Converting(usize),
    Done,
    Cancelled,
}

/// Display status of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Waiting,
    Skipped,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

/// What the renderer shows for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotView {
    pub slot: JobSlot,
    pub fraction: f64,
    pub status: SlotStatus,
}

/// Snapshot read by renderers; only the orchestrator mutates it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    pub phase: Phase,
    pub input: Option<PathBuf>,
    pub slots: Vec<SlotView>,
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

impl UiState {
    pub fn new() -> Self {
        Self {
            phase: Phase::SelectingFile,
            input: None,
            slots: Vec::new(),
        }
    }

    pub fn slot(&self, slot: &JobSlot) -> Option<&SlotView> {
        self.slots.iter().find(|view| &view.slot == slot)
    }

    pub(crate) fn slot_mut(&mut self, slot: &JobSlot) -> Option<&mut SlotView> {
        self.slots.iter_mut().find(|view| &view.slot == slot)
    }

    /// Fraction shown for a slot, zero when the slot is unknown
    pub fn fraction(&self, slot: &JobSlot) -> f64 {
        self.slot(slot).map(|view| view.fraction).unwrap_or(0.0)
    }
}
