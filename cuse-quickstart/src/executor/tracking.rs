//! Step tracking from `start_subtask` announcements
//!
//! Best effort only: the agent is free to skip announcements, so the current
//! step may lag behind or jump ahead of what is actually happening.

use cuse_quickstart_sdk::tools::START_SUBTASK;
use cuse_quickstart_sdk::{ExecutionMessage, WorkflowStep};
use tracing::warn;

/// Position of the step announced by a message, if any.
///
/// Only the first tool invocation of the message is inspected. Unknown ids
/// (and arguments that have not finished streaming) yield `None`.
pub fn announced_step(steps: &[WorkflowStep], message: &ExecutionMessage) -> Option<usize> {
    let first = message.first_tool_invocation()?;
    if first.tool_name != START_SUBTASK {
        return None;
    }
    let id = first.args.get("id")?.as_str()?;
    steps.iter().position(|step| step.id == id)
}

fn unknown_announcement<'a>(steps: &[WorkflowStep], message: &'a ExecutionMessage) -> Option<&'a str> {
    let first = message.first_tool_invocation()?;
    if first.tool_name != START_SUBTASK || !first.is_resolved() {
        return None;
    }
    let id = first.args.get("id")?.as_str()?;
    (!steps.iter().any(|step| step.id == id)).then_some(id)
}

/// Tracks the most recently announced step of one run
#[derive(Debug, Clone)]
pub struct StepTracker {
    steps: Vec<WorkflowStep>,
    current: Option<usize>,
}

impl StepTracker {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self {
            steps,
            current: None,
        }
    }

    /// `None` means no step has been announced yet
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Feed the latest transcript message. Returns the new index when it changed.
    pub fn observe(&mut self, message: &ExecutionMessage) -> Option<usize> {
        let Some(index) = announced_step(&self.steps, message) else {
            if let Some(id) = unknown_announcement(&self.steps, message) {
                warn!(subtask = %id, "Agent announced an unknown subtask");
            }
            return None;
        };
        if self.current == Some(index) {
            return None;
        }
        self.current = Some(index);
        Some(index)
    }

    pub fn step(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }
}
