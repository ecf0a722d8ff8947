// Orchestrator - Single consumer of the run's message queue

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::FailurePolicy;
use crate::domain::model::{
    FailureKind, JobId, JobResult, Phase, PlannedJob, ProgressSample, SlotStatus, SlotView,
    TerminalStatus, UiState,
};
use crate::engine::{JobEvent, JobHandle};
use crate::ports::{JobSubmitter, Renderer};

/// Input from the user side of the application
#[derive(Debug, Clone, PartialEq)]
pub enum UiInput {
    FileSelected(PathBuf),
    SettingsCompleted(Vec<PlannedJob>),
    Cancel,
}

/// Everything the orchestrator reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ui(UiInput),
    Job(JobEvent),
}

impl From<JobEvent> for Message {
    fn from(event: JobEvent) -> Self {
        Message::Job(event)
    }
}

impl From<UiInput> for Message {
    fn from(input: UiInput) -> Self {
        Message::Ui(input)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every planned job reached a terminal status or was skipped
    Completed { succeeded: usize, failed: usize },
    /// The user cancelled the run
    Cancelled,
    /// The run could not proceed
    Aborted(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } | RunOutcome::Cancelled => 0,
            RunOutcome::Aborted(_) => 1,
        }
    }
}

/// Result of handling one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(RunOutcome),
}

#[derive(Debug)]
struct ActiveJob {
    index: usize,
    handle: JobHandle,
}

/// Owns the UI state and sequences jobs one at a time.
///
/// Jobs run strictly in plan order: the next job is submitted only after the
/// active one reports a terminal status. Messages from any job other than
/// the active one are ignored.
pub struct Orchestrator<S: JobSubmitter, R: Renderer> {
    submitter: S,
    renderer: R,
    policy: FailurePolicy,
    ui: UiState,
    plan: Vec<PlannedJob>,
    active: Option<ActiveJob>,
    /// Cancelled job whose terminal message ends the run
    cancelling: Option<JobId>,
    succeeded: usize,
    failed: usize,
}

impl<S: JobSubmitter, R: Renderer> Orchestrator<S, R> {
    pub fn new(submitter: S, renderer: R, policy: FailurePolicy) -> Self {
        Self {
            submitter,
            renderer,
            policy,
            ui: UiState::new(),
            plan: Vec::new(),
            active: None,
            cancelling: None,
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.ui.phase
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Consume messages until the run ends
    pub async fn run(&mut self, messages: &mut mpsc::UnboundedReceiver<Message>) -> RunOutcome {
        self.renderer.render(&self.ui);
        while let Some(message) = messages.recv().await {
            if let Flow::Exit(outcome) = self.handle(message) {
                info!(?outcome, "Run finished");
                return outcome;
            }
        }
        warn!("Message queue closed before the run finished");
        RunOutcome::Aborted("message queue closed before the run finished".to_string())
    }

    /// Apply one message to the state machine
    pub fn handle(&mut self, message: Message) -> Flow {
        match message {
            Message::Ui(UiInput::FileSelected(path)) => self.on_file_selected(path),
            Message::Ui(UiInput::SettingsCompleted(plan)) => self.on_settings_completed(plan),
            Message::Ui(UiInput::Cancel) => self.on_cancel(),
            Message::Job(JobEvent::Progress(sample)) => self.on_progress(sample),
            Message::Job(JobEvent::Completed(result)) => self.on_completed(result),
        }
    }

    fn on_file_selected(&mut self, path: PathBuf) -> Flow {
        if self.ui.phase != Phase::SelectingFile {
            debug!(phase = ?self.ui.phase, "Ignoring file selection");
            return Flow::Continue;
        }
        info!("Selected input {}", path.display());
        self.ui.input = Some(path);
        self.ui.phase = Phase::Configuring;
        self.render();
        Flow::Continue
    }

    fn on_settings_completed(&mut self, plan: Vec<PlannedJob>) -> Flow {
        if self.ui.phase != Phase::Configuring {
            debug!(phase = ?self.ui.phase, "Ignoring settings");
            return Flow::Continue;
        }
        self.ui.slots = plan
            .iter()
            .map(|job| SlotView {
                slot: job.slot.clone(),
                fraction: 0.0,
                status: if job.skipped {
                    SlotStatus::Skipped
                } else {
                    SlotStatus::Waiting
                },
            })
            .collect();
        self.plan = plan;
        self.launch_from(0)
    }

    fn on_cancel(&mut self) -> Flow {
        match self.ui.phase {
            Phase::Done | Phase::Cancelled => {
                debug!("Cancel ignored, run already finished");
                Flow::Continue
            }
            Phase::Converting(index) => {
                info!("Cancelling run");
                if let Some(active) = &self.active {
                    active.handle.cancel();
                    self.cancelling = Some(active.handle.id());
                }
                self.set_status(index, SlotStatus::Cancelled);
                self.ui.phase = Phase::Cancelled;
                self.render();
                match self.cancelling {
                    Some(_) => Flow::Continue,
                    None => Flow::Exit(RunOutcome::Cancelled),
                }
            }
            Phase::SelectingFile | Phase::Configuring => {
                info!("Cancelled before conversion started");
                self.ui.phase = Phase::Cancelled;
                self.render();
                Flow::Exit(RunOutcome::Cancelled)
            }
        }
    }

    fn on_progress(&mut self, sample: ProgressSample) -> Flow {
        let index = match (&self.active, self.ui.phase) {
            (Some(active), Phase::Converting(index)) if active.handle.id() == sample.job_id => index,
            _ => return Flow::Continue,
        };

        let slot = &self.plan[index].slot;
        if let Some(view) = self.ui.slot_mut(slot) {
            if sample.fraction > view.fraction {
                view.fraction = sample.fraction.min(1.0);
                self.render();
            }
        }
        Flow::Continue
    }

    fn on_completed(&mut self, result: JobResult) -> Flow {
        if self.cancelling == Some(result.job_id) {
            debug!(job_id = %result.job_id, "Cancelled job stopped");
            self.cancelling = None;
            self.active = None;
            return Flow::Exit(RunOutcome::Cancelled);
        }

        let index = match &self.active {
            Some(active) if active.handle.id() == result.job_id => active.index,
            _ => {
                debug!(job_id = %result.job_id, "Ignoring result of inactive job");
                return Flow::Continue;
            }
        };
        self.active = None;

        match result.status {
            TerminalStatus::Succeeded => {
                self.succeeded += 1;
                let slot = self.plan[index].slot.clone();
                if let Some(view) = self.ui.slot_mut(&slot) {
                    view.fraction = 1.0;
                    view.status = SlotStatus::Succeeded;
                }
                self.launch_from(index + 1)
            }
            TerminalStatus::Failed(failure) => {
                self.failed += 1;
                warn!(slot = %self.plan[index].slot, "Job failed: {}", failure.detail);
                self.set_status(index, SlotStatus::Failed(failure.detail.clone()));

                if failure.kind == FailureKind::Probe {
                    self.finish_early();
                    return Flow::Exit(RunOutcome::Aborted(failure.detail));
                }
                match self.policy {
                    FailurePolicy::Continue => self.launch_from(index + 1),
                    FailurePolicy::Abort => {
                        self.finish_early();
                        Flow::Exit(self.completed())
                    }
                }
            }
            TerminalStatus::Cancelled => {
                self.set_status(index, SlotStatus::Cancelled);
                self.ui.phase = Phase::Cancelled;
                self.render();
                Flow::Exit(RunOutcome::Cancelled)
            }
        }
    }

    /// Submit the first runnable job at or after `start`, or finish the run
    fn launch_from(&mut self, start: usize) -> Flow {
        let next = (start..self.plan.len()).find(|&i| !self.plan[i].skipped);

        let Some(index) = next else {
            self.ui.phase = Phase::Done;
            self.render();
            return Flow::Exit(self.completed());
        };

        let job = &self.plan[index];
        info!(slot = %job.slot, output = %job.request.output_path.display(), "Starting job");
        let handle = self.submitter.submit(job.request.clone());
        self.active = Some(ActiveJob { index, handle });
        self.set_status(index, SlotStatus::Running);
        self.ui.phase = Phase::Converting(index);
        self.render();
        Flow::Continue
    }

    /// Mark every job after the active one as skipped and go to `Done`
    fn finish_early(&mut self) {
        for view in self.ui.slots.iter_mut() {
            if view.status == SlotStatus::Waiting {
                view.status = SlotStatus::Skipped;
            }
        }
        self.ui.phase = Phase::Done;
        self.render();
    }

    fn completed(&self) -> RunOutcome {
        RunOutcome::Completed {
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }

    fn set_status(&mut self, index: usize, status: SlotStatus) {
        let slot = self.plan[index].slot.clone();
        if let Some(view) = self.ui.slot_mut(&slot) {
            view.status = status;
        }
    }

    fn render(&mut self) {
        self.renderer.render(&self.ui);
    }
}
