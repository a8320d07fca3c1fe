//! Workflow execution controller
//!
//! [`WorkflowExecutor`] seeds an agent session with a workflow's steps, tracks
//! which step the agent announced last, answers the agent's tool calls through
//! a [`WorkflowToolbox`] and lets the caller stop the run at any time. Progress
//! is published as [`ExecutionEvent`]s on a broadcast channel.

mod credentials;
mod prompt;
mod toolbox;
mod tracking;

pub use credentials::CredentialRequest;
pub use prompt::{build_instruction, CONTINUE_MESSAGE};
pub use toolbox::{WorkflowToolbox, FILL_FAILURE, FILL_SUCCESS, MAX_WAIT_SECONDS};
pub use tracking::{announced_step, StepTracker};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cuse_quickstart_sdk::{
    AgentSession, CredentialStore, Desktop, ExecutionMessage, QuickstartError,
    QuickstartResult, TurnContext, TurnObserver, Workflow,
};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress notifications of a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Started { workflow_id: Uuid },
    /// Latest transcript message, sent again every time it grows
    Message(ExecutionMessage),
    StepChanged { index: usize, step_id: String },
    /// The agent needs credentials the keychain does not have
    CredentialsRequested(Arc<CredentialRequest>),
    Finished,
    Stopped,
    Failed { error: String },
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Both seed messages were answered
    Finished { transcript: Vec<ExecutionMessage> },
    /// [`WorkflowExecutor::stop`] was called
    Stopped { transcript: Vec<ExecutionMessage> },
}

impl ExecutionOutcome {
    pub fn transcript(&self) -> &[ExecutionMessage] {
        match self {
            ExecutionOutcome::Finished { transcript } | ExecutionOutcome::Stopped { transcript } => {
                transcript
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ExecutionOutcome::Stopped { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Appended to the instruction under `PROCESS HINTS:`
    pub process_hints: Option<String>,
    pub max_wait_seconds: f64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            process_hints: None,
            max_wait_seconds: MAX_WAIT_SECONDS,
        }
    }
}

struct ExecutionState {
    /// Incremented per run so a stopped run cannot clobber its successor
    run: u64,
    is_executing: bool,
    tracker: StepTracker,
    transcript: Vec<ExecutionMessage>,
    cancel: Option<CancellationToken>,
}

type SharedState = Arc<Mutex<ExecutionState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ExecutionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn upsert(transcript: &mut Vec<ExecutionMessage>, message: &ExecutionMessage) {
    match transcript.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => *existing = message.clone(),
        None => transcript.push(message.clone()),
    }
}

/// Observes one run's transcript
struct RunObserver {
    run: u64,
    state: SharedState,
    events: broadcast::Sender<ExecutionEvent>,
    cancel: CancellationToken,
    transcript: Mutex<Vec<ExecutionMessage>>,
}

impl RunObserver {
    fn into_transcript(self) -> Vec<ExecutionMessage> {
        self.transcript
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TurnObserver for RunObserver {
    fn on_turn(&self, message: &ExecutionMessage) {
        if self.cancel.is_cancelled() {
            return;
        }

        upsert(
            &mut self.transcript.lock().unwrap_or_else(PoisonError::into_inner),
            message,
        );

        let step_change = {
            let mut state = lock(&self.state);
            if state.run != self.run {
                return;
            }
            upsert(&mut state.transcript, message);
            match state.tracker.observe(message) {
                Some(index) => state
                    .tracker
                    .step(index)
                    .map(|step| (index, step.id.clone())),
                None => None,
            }
        };

        let _ = self.events.send(ExecutionEvent::Message(message.clone()));
        if let Some((index, step_id)) = step_change {
            info!(step = %step_id, index, "Agent started subtask");
            let _ = self
                .events
                .send(ExecutionEvent::StepChanged { index, step_id });
        }
    }
}

/// Drives one workflow at a time through an agent session
pub struct WorkflowExecutor<S> {
    session: AsyncMutex<S>,
    credentials: Arc<dyn CredentialStore>,
    desktop: Arc<dyn Desktop>,
    options: ExecutorOptions,
    state: SharedState,
    requests: Arc<Mutex<Vec<Arc<CredentialRequest>>>>,
    events: broadcast::Sender<ExecutionEvent>,
}

impl<S: AgentSession> WorkflowExecutor<S> {
    pub fn new(session: S, credentials: Arc<dyn CredentialStore>, desktop: Arc<dyn Desktop>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session: AsyncMutex::new(session),
            credentials,
            desktop,
            options: ExecutorOptions::default(),
            state: Arc::new(Mutex::new(ExecutionState {
                run: 0,
                is_executing: false,
                tracker: StepTracker::new(Vec::new()),
                transcript: Vec::new(),
                cancel: None,
            })),
            requests: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn is_executing(&self) -> bool {
        lock(&self.state).is_executing
    }

    /// Index of the last announced step, `None` before the first announcement
    pub fn current_step_index(&self) -> Option<usize> {
        lock(&self.state).tracker.current()
    }

    /// Transcript of the current or most recent run
    pub fn transcript(&self) -> Vec<ExecutionMessage> {
        lock(&self.state).transcript.clone()
    }

    /// Credential requests raised during the current run that are still open
    pub fn pending_credential_requests(&self) -> Vec<Arc<CredentialRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| !r.is_submitted())
            .cloned()
            .collect()
    }

    /// Stop the running workflow.
    ///
    /// In-flight agent traffic is cancelled and later turns are ignored.
    /// Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.is_executing {
            return false;
        }
        state.is_executing = false;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        info!("Workflow execution stop requested");
        true
    }

    /// Run a workflow to completion or until stopped.
    ///
    /// Resets the session, sends the step instruction and then the continue
    /// message. Fails fast for workflows without steps and while another run
    /// is in progress.
    pub async fn execute(&self, workflow: &Workflow) -> QuickstartResult<ExecutionOutcome> {
        if workflow.steps.is_empty() {
            return Err(QuickstartError::EmptyWorkflow(workflow.name.clone()));
        }

        let (run, cancel) = {
            let mut state = lock(&self.state);
            if state.is_executing {
                return Err(QuickstartError::AlreadyExecuting);
            }
            state.run += 1;
            state.is_executing = true;
            state.tracker = StepTracker::new(workflow.steps.clone());
            state.transcript.clear();
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            (state.run, cancel)
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "Starting workflow execution"
        );
        let _ = self.events.send(ExecutionEvent::Started {
            workflow_id: workflow.id,
        });

        let observer = RunObserver {
            run,
            state: self.state.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
            transcript: Mutex::new(Vec::new()),
        };
        let toolbox = WorkflowToolbox::new(
            self.credentials.clone(),
            self.desktop.clone(),
            self.events.clone(),
        )
        .with_max_wait(self.options.max_wait_seconds)
        .with_request_sink(self.requests.clone());

        let result = {
            let mut session = self.session.lock().await;
            session.reset();
            let ctx = TurnContext {
                tools: &toolbox,
                observer: &observer,
                cancel: &cancel,
            };
            self.drive(&mut *session, workflow, ctx).await
        };

        {
            let mut state = lock(&self.state);
            if state.run == run {
                state.is_executing = false;
                state.cancel = None;
            }
        }

        let transcript = observer.into_transcript();
        match result {
            Ok(()) if !cancel.is_cancelled() => {
                info!(workflow_id = %workflow.id, "Workflow execution finished");
                let _ = self.events.send(ExecutionEvent::Finished);
                Ok(ExecutionOutcome::Finished { transcript })
            }
            Ok(()) => Ok(self.stopped(workflow, transcript)),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                Ok(self.stopped(workflow, transcript))
            }
            Err(e) => {
                error!(workflow_id = %workflow.id, error = %e, "Workflow execution failed");
                let _ = self.events.send(ExecutionEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut S,
        workflow: &Workflow,
        ctx: TurnContext<'_>,
    ) -> QuickstartResult<()> {
        let instruction = build_instruction(workflow, self.options.process_hints.as_deref());
        for content in [instruction, CONTINUE_MESSAGE.to_string()] {
            if ctx.cancel.is_cancelled() {
                return Err(QuickstartError::Cancelled);
            }
            session.append(ExecutionMessage::user(content), ctx).await?;
        }
        Ok(())
    }

    fn stopped(&self, workflow: &Workflow, transcript: Vec<ExecutionMessage>) -> ExecutionOutcome {
        warn!(workflow_id = %workflow.id, "Workflow execution stopped");
        let _ = self.events.send(ExecutionEvent::Stopped);
        ExecutionOutcome::Stopped { transcript }
    }
}
