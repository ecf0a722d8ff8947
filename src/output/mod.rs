//! Presentation of run state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WebvidsError;
use crate::ports::Renderer;

pub mod render;

pub use render::{ConsoleRenderer, JsonRenderer, NoOpRenderer};

/// How run state is written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Progress bars for a terminal
    #[default]
    Console,
    /// One JSON object per state change
    Json,
    /// Nothing
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = WebvidsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(OutputFormat::Console),
            "json" => Ok(OutputFormat::Json),
            "quiet" | "none" => Ok(OutputFormat::Quiet),
            other => Err(WebvidsError::config(format!("unknown output format '{}'", other))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Console => "console",
            OutputFormat::Json => "json",
            OutputFormat::Quiet => "quiet",
        };
        f.write_str(name)
    }
}

/// Renderer writing to stdout in the given format
pub fn stdout_renderer(format: OutputFormat) -> Box<dyn Renderer + Send> {
    match format {
        OutputFormat::Console => Box::new(ConsoleRenderer::new(std::io::stdout())),
        OutputFormat::Json => Box::new(JsonRenderer::new(std::io::stdout())),
        OutputFormat::Quiet => Box::new(NoOpRenderer),
    }
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, state: &crate::domain::model::UiState) {
        (**self).render(state)
    }
}
