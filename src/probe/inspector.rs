//! ffprobe-backed media inspector

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::domain::model::ProbeMetadata;
use crate::error::{WebvidsError, WebvidsResult};
use crate::ports::ProbePort;
use crate::probe::parse_probe_output;

/// Inspects media files by running ffprobe
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl Default for FfprobeInspector {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeInspector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the generated ones
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.tools.ffprobe).with_leading_args(config.tools.ffprobe_args.clone())
    }
}

#[async_trait]
impl ProbePort for FfprobeInspector {
    async fn probe(&self, path: &Path) -> WebvidsResult<ProbeMetadata> {
        info!("Probing media file: {}", path.display());

        if !path.exists() {
            return Err(WebvidsError::InputFileNotFound {
                path: path.display().to_string(),
            });
        }

        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                WebvidsError::probe(format!("could not run {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WebvidsError::probe(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let metadata = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(
            duration = metadata.duration_seconds,
            width = ?metadata.width,
            height = ?metadata.height,
            "Probe completed"
        );
        Ok(metadata)
    }
}
