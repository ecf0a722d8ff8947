//! Renderer implementations

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::domain::model::{Phase, SlotStatus, SlotView, UiState};
use crate::ports::Renderer;
use crate::utils::{format_percent, progress_bar, BAR_WIDTH};

/// Plain-text progress bars, one line per visible change of a slot
pub struct ConsoleRenderer<W: Write> {
    out: W,
    /// Last printed (percent, status) per slot, in slot order
    printed: Vec<(u32, SlotStatus)>,
    last_phase: Option<Phase>,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: Vec::new(),
            last_phase: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_state(&mut self, state: &UiState) -> std::io::Result<()> {
        if self.printed.len() != state.slots.len() {
            self.printed = vec![(u32::MAX, SlotStatus::Waiting); state.slots.len()];
        }

        for (index, view) in state.slots.iter().enumerate() {
            let percent = (view.fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
            let key = (percent, view.status.clone());
            if self.printed[index] != key {
                writeln!(self.out, "{}", slot_line(view))?;
                self.printed[index] = key;
            }
        }

        if self.last_phase != Some(state.phase) {
            self.last_phase = Some(state.phase);
            match state.phase {
                Phase::Done => writeln!(self.out, "done")?,
                Phase::Cancelled => writeln!(self.out, "cancelled")?,
                Phase::Configuring => {
                    if let Some(input) = &state.input {
                        writeln!(self.out, "input: {}", input.display())?;
                    }
                }
                Phase::SelectingFile | Phase::Converting(_) => {}
            }
        }
        self.out.flush()
    }
}

fn slot_line(view: &SlotView) -> String {
    let status = match &view.status {
        SlotStatus::Waiting => "waiting".to_string(),
        SlotStatus::Skipped => "skipped".to_string(),
        SlotStatus::Running => "running".to_string(),
        SlotStatus::Succeeded => "finished".to_string(),
        SlotStatus::Failed(detail) => format!("failed: {}", detail),
        SlotStatus::Cancelled => "cancelled".to_string(),
    };
    format!(
        "{:<5} {} {} {}",
        view.slot,
        progress_bar(view.fraction, BAR_WIDTH),
        format_percent(view.fraction),
        status
    )
}

impl<W: Write> Renderer for ConsoleRenderer<W> {
    fn render(&mut self, state: &UiState) {
        if let Err(e) = self.write_state(state) {
            debug!("Console render failed: {}", e);
        }
    }
}

#[derive(Serialize)]
struct JsonFrame<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    state: &'a UiState,
}

/// One JSON object per distinct state, newline separated
pub struct JsonRenderer<W: Write> {
    out: W,
    last: Option<UiState>,
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_state(&mut self, state: &UiState) -> std::io::Result<()> {
        let frame = JsonFrame {
            timestamp: Utc::now(),
            state,
        };
        serde_json::to_writer(&mut self.out, &frame)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

impl<W: Write> Renderer for JsonRenderer<W> {
    fn render(&mut self, state: &UiState) {
        if self.last.as_ref() == Some(state) {
            return;
        }
        if let Err(e) = self.write_state(state) {
            debug!("JSON render failed: {}", e);
        }
        self.last = Some(state.clone());
    }
}

/// Discards every state
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRenderer;

impl Renderer for NoOpRenderer {
    fn render(&mut self, _state: &UiState) {}
}
