//! Instruction transcript construction

use cuse_quickstart_sdk::Workflow;

/// Second seed message, sent once the agent answered the instruction
pub const CONTINUE_MESSAGE: &str = "continue. Or 'done' if the workflow is complete.";

const GUIDANCE: &str = "Approach each step with a plan. Think step by step and reason about \
the actions you need to take before executing the next actions. If something goes wrong, try \
to fix it yourself or try another approach. Don't give up.";

/// Build the initial user instruction for a workflow.
///
/// Every step is listed in execution order as `subtask_id: <id>: <description>`
/// so the agent can announce it with `start_subtask`. Optional process hints
/// are appended after the fixed guidance.
pub fn build_instruction(workflow: &Workflow, process_hints: Option<&str>) -> String {
    let steps = workflow
        .steps
        .iter()
        .map(|step| format!("subtask_id: {}: {}", step.id, step.description))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!("Execute the following workflow:\n{}\n\n{}", steps, GUIDANCE);

    if let Some(hints) = process_hints.map(str::trim).filter(|h| !h.is_empty()) {
        prompt.push_str("\n\nPROCESS HINTS:\n");
        prompt.push_str(hints);
    }

    prompt
}
