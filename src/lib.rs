//! webvids CLI Library
//!
//! Encodes one input video into HEVC and AV1 versions for the web. Each
//! encode is an ffmpeg subprocess that reports progress over a local socket;
//! a single event loop sequences the encodes and drives the display.

pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod output;
pub mod planner;
pub mod ports;
pub mod probe;
pub mod utils;

// Re-export commonly used types
pub use app::{Message, Orchestrator, RunOutcome, UiInput};
pub use config::{AppConfig, FailurePolicy};
pub use domain::model::{JobId, JobRequest, JobResult, ProbeMetadata, TerminalStatus, UiState};
pub use engine::{JobEvent, JobHandle, Transcoder};
pub use error::{WebvidsError, WebvidsResult};
