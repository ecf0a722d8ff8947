//! Configuration loading and hierarchy
//!
//! Precedence: CLI > Env > File > Defaults. The CLI layer is applied by the
//! command handlers; this module covers the rest.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::rules::DEFAULT_MAX_DIMENSION;
use crate::engine::channel::DEFAULT_READ_CHUNK_SIZE;
use crate::engine::progress::DEFAULT_MAX_LINE_BYTES;
use crate::error::{WebvidsError, WebvidsResult};

/// Config file read from the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "webvids.toml";

/// What to do with the remaining jobs after one fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Run the next job anyway
    #[default]
    Continue,
    /// Skip every remaining job
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = WebvidsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(WebvidsError::config(format!(
                "unknown failure policy '{}' (expected continue or abort)",
                other
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => f.write_str("continue"),
            FailurePolicy::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Inserted before generated ffmpeg arguments
    pub ffmpeg_args: Vec<String>,
    /// Inserted before generated ffprobe arguments
    pub ffprobe_args: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg_args: Vec::new(),
            ffprobe_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Bound for the short side of encoded frames
    pub max_dimension: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("optimized"),
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub read_chunk_size: usize,
    pub max_line_bytes: usize,
    /// Pause after a successful encode before reporting it
    pub settle_delay_ms: u64,
    /// Wait for the progress channel to drain after the encoder exits
    pub channel_grace_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            settle_delay_ms: 500,
            channel_grace_ms: 500,
            socket_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub on_failure: FailurePolicy,
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tools: ToolsConfig,
    pub output: OutputConfig,
    pub progress: ProgressConfig,
    pub run: RunConfig,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> WebvidsResult<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| WebvidsError::config(format!("failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from `webvids.toml` when present, then apply the
    /// environment. An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> WebvidsResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> WebvidsResult<Self> {
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            WebvidsError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Override values from environment variables, read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> WebvidsResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_mappings: [(&str, fn(&mut AppConfig, String) -> WebvidsResult<()>); 4] = [
            ("WEBVIDS_FFMPEG", |c, v| {
                c.tools.ffmpeg = PathBuf::from(v);
                Ok(())
            }),
            ("WEBVIDS_FFPROBE", |c, v| {
                c.tools.ffprobe = PathBuf::from(v);
                Ok(())
            }),
            ("WEBVIDS_OUTPUT_DIR", |c, v| {
                c.output.directory = PathBuf::from(v);
                Ok(())
            }),
            ("WEBVIDS_ON_FAILURE", |c, v| {
                c.run.on_failure = v.parse()?;
                Ok(())
            }),
        ];

        for (key, apply) in env_mappings {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!("Applying {} from environment", key);
                apply(self, value)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> WebvidsResult<()> {
        if self.progress.read_chunk_size == 0 {
            return Err(WebvidsError::config("progress.read_chunk_size must be positive"));
        }
        if self.progress.max_line_bytes == 0 {
            return Err(WebvidsError::config("progress.max_line_bytes must be positive"));
        }
        if self.output.max_dimension == 0 {
            return Err(WebvidsError::config("output.max_dimension must be positive"));
        }
        if self.tools.ffmpeg.as_os_str().is_empty() || self.tools.ffprobe.as_os_str().is_empty() {
            return Err(WebvidsError::config("tool paths must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.tools.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.output.directory, PathBuf::from("optimized"));
        assert_eq!(config.output.max_dimension, 1080);
        assert_eq!(config.progress.read_chunk_size, 64);
        assert_eq!(config.progress.settle_delay_ms, 500);
        assert_eq!(config.run.on_failure, FailurePolicy::Continue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [output]
            max_dimension = 720

            [run]
            on_failure = "abort"
            "#,
        )
        .unwrap();
        assert_eq!(config.output.max_dimension, 720);
        assert_eq!(config.output.directory, PathBuf::from("optimized"));
        assert_eq!(config.run.on_failure, FailurePolicy::Abort);
        assert_eq!(config.tools, ToolsConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_toml_str("[progress]\nread_chunk_size = 0\n").unwrap_err();
        assert!(matches!(err, WebvidsError::ConfigError { .. }));
        assert!(AppConfig::from_toml_str("[output]\nmax_dimension = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[run]\non_failure = \"retry\"\n").is_err());
        assert!(AppConfig::from_toml_str("not toml = = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WEBVIDS_FFMPEG", "/opt/ffmpeg/bin/ffmpeg"),
            ("WEBVIDS_OUTPUT_DIR", "out"),
            ("WEBVIDS_ON_FAILURE", "Abort"),
            ("WEBVIDS_FFPROBE", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.tools.ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.tools.ffprobe, PathBuf::from("ffprobe"));
        assert_eq!(config.output.directory, PathBuf::from("out"));
        assert_eq!(config.run.on_failure, FailurePolicy::Abort);
    }

    #[test]
    fn test_bad_env_policy() {
        let mut config = AppConfig::default();
        let result = config.apply_env_from(|key| {
            (key == "WEBVIDS_ON_FAILURE").then(|| "sometimes".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[tools]\nffmpeg = \"/usr/local/bin/ffmpeg\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert!(config.tools.ffmpeg.ends_with("ffmpeg"));
        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("continue".parse::<FailurePolicy>().unwrap(), FailurePolicy::Continue);
        assert_eq!(" ABORT ".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(FailurePolicy::Abort.to_string(), "abort");
    }
}
