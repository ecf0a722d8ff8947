// Application layer - Run orchestration

pub mod orchestrator;

pub use orchestrator::{Flow, Message, Orchestrator, RunOutcome, UiInput};
