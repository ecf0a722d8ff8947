//! Error handling module for webvids

use thiserror::Error;

/// Main error type for webvids operations
#[derive(Error, Debug)]
pub enum WebvidsError {
    /// Input file not found or inaccessible
    #[error("Input file not found: {path}")]
    InputFileNotFound { path: String },

    /// Media probe error
    #[error("Failed to probe media file: {message}")]
    ProbeError { message: String },

    /// Encoder binary missing or could not be launched
    #[error("Failed to launch {program}: {message}")]
    SpawnError { program: String, message: String },

    /// Progress endpoint could not be created
    #[error("Failed to open progress channel at {address}: {message}")]
    ChannelBindError { address: String, message: String },

    /// Encoder exited with a failure status
    #[error("Encoder exited with {status}: {stderr}")]
    SubprocessFailure { status: String, stderr: String },

    /// Invalid configuration value or unreadable config file
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for webvids operations
pub type WebvidsResult<T> = std::result::Result<T, WebvidsError>;

impl WebvidsError {
    pub(crate) fn probe(message: impl Into<String>) -> Self {
        WebvidsError::ProbeError {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        WebvidsError::ConfigError {
            message: message.into(),
        }
    }
}
