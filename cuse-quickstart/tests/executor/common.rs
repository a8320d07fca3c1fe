//! Common test utilities for executor tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cuse_quickstart::executor::{ExecutionEvent, WorkflowExecutor};
use cuse_quickstart::memory::InMemoryCredentialStore;
use cuse_quickstart_sdk::tools::{COMPUTER, FILL_CREDENTIALS, START_SUBTASK};
use cuse_quickstart_sdk::{
    async_trait, AgentSession, CredentialFields, Desktop, ExecutionMessage, KeychainItem,
    NewWorkflow, QuickstartError, QuickstartResult, ToolInvocation, TurnContext, Workflow,
    WorkflowStep,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};

/// One scripted assistant turn
#[derive(Debug, Clone)]
pub enum Turn {
    /// Text plus tool calls, resolved through the controller's toolbox
    Reply {
        text: String,
        tools: Vec<(String, Value)>,
    },
    /// Signal `reached` and wait for cancellation, then fail with `Cancelled`
    BlockUntilCancelled,
    /// Signal `reached`, wait for cancellation, then still report a turn
    ReplyAfterCancel(String),
    Fail(String),
}

pub fn reply(text: &str) -> Turn {
    Turn::Reply {
        text: text.to_string(),
        tools: Vec::new(),
    }
}

pub fn call(tool: &str, args: Value) -> Turn {
    Turn::Reply {
        text: String::new(),
        tools: vec![(tool.to_string(), args)],
    }
}

pub fn calls(tools: &[(&str, Value)]) -> Turn {
    Turn::Reply {
        text: String::new(),
        tools: tools
            .iter()
            .map(|(name, args)| (name.to_string(), args.clone()))
            .collect(),
    }
}

pub fn start_subtask(id: &str) -> Turn {
    call(START_SUBTASK, json!({ "id": id }))
}

pub fn screenshot() -> Turn {
    call(COMPUTER, json!({"action": "screenshot"}))
}

pub fn fill_credentials(service: &str) -> Turn {
    call(
        FILL_CREDENTIALS,
        json!({
            "service": service,
            "actions": [
                {"type": "email", "coordinates": {"x": 100.0, "y": 200.0}},
                {"type": "password", "coordinates": {"x": 100.0, "y": 260.0}}
            ]
        }),
    )
}

/// Agent session that plays back one list of turns per `append`
pub struct ScriptedSession {
    script: VecDeque<Vec<Turn>>,
    messages: Vec<ExecutionMessage>,
    calls: usize,
    pub reached: Arc<Notify>,
}

impl ScriptedSession {
    pub fn new(script: Vec<Vec<Turn>>) -> Self {
        Self {
            script: script.into(),
            messages: Vec::new(),
            calls: 0,
            reached: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl AgentSession for ScriptedSession {
    async fn append(
        &mut self,
        message: ExecutionMessage,
        ctx: TurnContext<'_>,
    ) -> QuickstartResult<()> {
        ctx.observer.on_turn(&message);
        self.messages.push(message);

        let turns = self.script.pop_front().unwrap_or_default();
        for turn in turns {
            if ctx.cancel.is_cancelled() {
                return Err(QuickstartError::Cancelled);
            }
            match turn {
                Turn::Reply { text, tools } => {
                    let mut assistant = ExecutionMessage::assistant(text);
                    for (name, args) in tools {
                        self.calls += 1;
                        assistant = assistant.with_tool_invocation(ToolInvocation::pending(
                            format!("call_{}", self.calls),
                            name,
                            args,
                        ));
                    }
                    ctx.observer.on_turn(&assistant);
                    for i in 0..assistant.tool_invocations.len() {
                        let result = ctx
                            .tools
                            .handle(&assistant.tool_invocations[i], ctx.cancel)
                            .await;
                        assistant.tool_invocations[i].resolve(result);
                        ctx.observer.on_turn(&assistant);
                    }
                    self.messages.push(assistant);
                }
                Turn::BlockUntilCancelled => {
                    self.reached.notify_one();
                    ctx.cancel.cancelled().await;
                    return Err(QuickstartError::Cancelled);
                }
                Turn::ReplyAfterCancel(text) => {
                    self.reached.notify_one();
                    ctx.cancel.cancelled().await;
                    let late = ExecutionMessage::assistant(text);
                    ctx.observer.on_turn(&late);
                    self.messages.push(late);
                    return Ok(());
                }
                Turn::Fail(reason) => return Err(QuickstartError::Session(reason)),
            }
        }
        Ok(())
    }

    fn messages(&self) -> &[ExecutionMessage] {
        &self.messages
    }

    fn reset(&mut self) {
        self.messages.clear();
    }
}

/// Desktop that records every call
#[derive(Default)]
pub struct RecordingDesktop {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingDesktop {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Desktop for RecordingDesktop {
    async fn perform(&self, tool_name: &str, args: &Value) -> QuickstartResult<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), args.clone()));
        Ok(json!({"output": "ok"}))
    }
}

pub struct Harness {
    pub executor: Arc<WorkflowExecutor<ScriptedSession>>,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub desktop: Arc<RecordingDesktop>,
    pub reached: Arc<Notify>,
}

pub fn harness(script: Vec<Vec<Turn>>) -> Harness {
    harness_with_store(script, InMemoryCredentialStore::new())
}

pub fn harness_with_store(script: Vec<Vec<Turn>>, store: InMemoryCredentialStore) -> Harness {
    let session = ScriptedSession::new(script);
    let reached = session.reached.clone();
    let credentials = Arc::new(store);
    let desktop = Arc::new(RecordingDesktop::default());
    let executor = Arc::new(WorkflowExecutor::new(
        session,
        credentials.clone(),
        desktop.clone(),
    ));
    Harness {
        executor,
        credentials,
        desktop,
        reached,
    }
}

/// Workflow with steps s1 "open app", s2 "login" and a keychain item for "example"
pub fn sample_workflow() -> Workflow {
    let mut draft = NewWorkflow::new("Example login");
    draft.steps = vec![
        WorkflowStep::with_id("s1", "open app"),
        WorkflowStep::with_id("s2", "login"),
    ];
    draft.keychain_items = vec![KeychainItem::new("example")];
    Workflow::from_draft(draft, Utc::now())
}

pub fn example_fields() -> CredentialFields {
    [
        ("email".to_string(), "me@example.com".to_string()),
        ("password".to_string(), "hunter2".to_string()),
    ]
    .into_iter()
    .collect()
}

/// Everything currently buffered on a receiver
pub fn drain(rx: &mut broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Tool results of the transcript in order
pub fn tool_results(transcript: &[ExecutionMessage]) -> Vec<Value> {
    transcript
        .iter()
        .flat_map(|m| m.tool_invocations.iter())
        .filter_map(|t| t.result.clone())
        .collect()
}
