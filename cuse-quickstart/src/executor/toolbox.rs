//! Tool dispatch for a workflow run

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cuse_quickstart_sdk::{
    CancellationToken, CredentialFields, CredentialRequestPayload, CredentialStore, Desktop,
    FillCredentials, ToolCall, ToolHandler, ToolInvocation,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::credentials::CredentialRequest;
use super::ExecutionEvent;

pub const FILL_SUCCESS: &str = "Form filled in successfully. You can now proceed to the next step.";
pub const FILL_FAILURE: &str = "Failed to fill in the form. Please try again.";

/// Default upper bound for a single `wait`
pub const MAX_WAIT_SECONDS: f64 = 60.0;

/// Resolves the agent's tool calls for one run.
///
/// `start_subtask` and `wait` are answered locally, `fill_credentials` is
/// intercepted and everything else is forwarded to the desktop.
pub struct WorkflowToolbox {
    credentials: Arc<dyn CredentialStore>,
    desktop: Arc<dyn Desktop>,
    events: broadcast::Sender<ExecutionEvent>,
    requests: Arc<Mutex<Vec<Arc<CredentialRequest>>>>,
    max_wait: f64,
}

impl WorkflowToolbox {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        desktop: Arc<dyn Desktop>,
        events: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            credentials,
            desktop,
            events,
            requests: Arc::new(Mutex::new(Vec::new())),
            max_wait: MAX_WAIT_SECONDS,
        }
    }

    pub fn with_max_wait(mut self, seconds: f64) -> Self {
        self.max_wait = seconds.max(0.0);
        self
    }

    /// Share the list that raised credential requests are pushed to
    pub fn with_request_sink(mut self, requests: Arc<Mutex<Vec<Arc<CredentialRequest>>>>) -> Self {
        self.requests = requests;
        self
    }

    async fn wait(&self, seconds: f64, cancel: &CancellationToken) -> Value {
        let secs = if seconds.is_finite() {
            seconds.clamp(0.0, self.max_wait)
        } else {
            1.0
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
            _ = cancel.cancelled() => {
                debug!("Wait interrupted by stop");
            }
        }
        json!(format!("Done waiting {} seconds", seconds))
    }

    async fn fill_credentials(&self, invocation: &ToolInvocation, call: FillCredentials) -> Value {
        let stored = match self.credentials.get(&call.service).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(service = %call.service, error = %e, "Keychain lookup failed");
                return json!(FILL_FAILURE);
            }
        };

        match stored {
            Some(fields) => {
                if self.replay(&call, &fields).await {
                    info!(service = %call.service, "Filled login form from keychain");
                    json!(FILL_SUCCESS)
                } else {
                    json!(FILL_FAILURE)
                }
            }
            None => self.request_credentials(invocation, call),
        }
    }

    /// Click each field and type the matching stored value
    async fn replay(&self, call: &FillCredentials, fields: &CredentialFields) -> bool {
        for action in &call.actions {
            let Some(value) = fields.get(action.kind.as_str()) else {
                warn!(service = %call.service, field = %action.kind, "No stored value for field");
                return false;
            };
            let filled = match self
                .desktop
                .click(action.coordinates.x, action.coordinates.y)
                .await
            {
                Ok(()) => self.desktop.type_text(value).await,
                Err(e) => Err(e),
            };
            if let Err(e) = filled {
                warn!(service = %call.service, field = %action.kind, error = %e, "Form fill failed");
                return false;
            }
        }
        true
    }

    fn request_credentials(&self, invocation: &ToolInvocation, call: FillCredentials) -> Value {
        let payload = CredentialRequestPayload {
            service: call.service,
            actions: call.actions,
        };
        let result = payload.to_value();
        let request = Arc::new(CredentialRequest::new(
            invocation.tool_call_id.clone(),
            payload,
            self.credentials.clone(),
        ));

        info!(service = %request.service(), "Credentials unknown, asking the user");
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let _ = self.events.send(ExecutionEvent::CredentialsRequested(request));
        result
    }
}

#[async_trait]
impl ToolHandler for WorkflowToolbox {
    async fn handle(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> Value {
        let call = match ToolCall::from_invocation(invocation) {
            Ok(call) => call,
            Err(e) => {
                warn!(tool = %invocation.tool_name, error = %e, "Malformed tool arguments");
                return json!({
                    "error": format!("Invalid arguments for {}: {}", invocation.tool_name, e)
                });
            }
        };

        match call {
            ToolCall::StartSubtask { id } => {
                json!(format!("Acknowledged. You will now approach subtask {}.", id))
            }
            ToolCall::Wait { seconds } => self.wait(seconds, cancel).await,
            ToolCall::FillCredentials(fill) => self.fill_credentials(invocation, fill).await,
            ToolCall::Desktop { name, args } => match self.desktop.perform(&name, &args).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %name, error = %e, "Desktop action failed");
                    json!({ "error": e.to_string() })
                }
            },
        }
    }
}
