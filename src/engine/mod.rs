//! Encoding engine: progress channel, job runner and the transcoder service

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::domain::model::{JobResult, ProgressSample};

pub mod channel;
pub mod progress;
pub mod runner;
pub mod transcoder;

pub use channel::{ChannelOutcome, ChannelSettings, ProgressServer};
pub use progress::ProgressParser;
pub use runner::{JobRunner, RunnerSettings};
pub use transcoder::{JobHandle, Transcoder};

/// Events produced by running jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// Completion fraction of a running job
    Progress(ProgressSample),
    /// Terminal status; always the last event of a job
    Completed(JobResult),
}

/// Destination for job events
///
/// Implemented for unbounded tokio senders of any message type a `JobEvent`
/// converts into, so the engine can feed the orchestrator queue directly.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver an event; returns false once nobody is listening
    fn emit(&self, event: JobEvent) -> bool;
}

impl<M> EventSink for mpsc::UnboundedSender<M>
where
    M: From<JobEvent> + Send + 'static,
{
    fn emit(&self, event: JobEvent) -> bool {
        self.send(M::from(event)).is_ok()
    }
}

/// Resolve once `true` has been published on a cancel/stop watch.
///
/// A dropped sender can no longer cancel anything, so this then never resolves.
pub(crate) async fn cancelled(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
