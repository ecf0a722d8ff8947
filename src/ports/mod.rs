// Ports - Interface definitions (contracts)

use std::path::Path;

use async_trait::async_trait;

use crate::domain::model::{JobRequest, ProbeMetadata, UiState};
use crate::engine::JobHandle;
use crate::error::WebvidsResult;

/// Port for media file probing
#[async_trait]
pub trait ProbePort: Send + Sync {
    /// Read duration and frame size of a media file
    async fn probe(&self, path: &Path) -> WebvidsResult<ProbeMetadata>;
}

/// Port the orchestrator uses to start jobs
///
/// Submission never blocks; progress and the terminal result arrive later as
/// messages on the orchestrator queue.
pub trait JobSubmitter {
    fn submit(&mut self, request: JobRequest) -> JobHandle;
}

/// Port for presenting orchestrator state
pub trait Renderer {
    /// Called after every state change
    fn render(&mut self, state: &UiState);
}
