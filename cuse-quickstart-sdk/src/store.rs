//! Persistence and desktop collaborators

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::QuickstartResult;
use crate::tools::COMPUTER;
use crate::types::{CredentialFields, NewWorkflow, Workflow, WorkflowPatch};

/// Key-value store of credential sets, keyed by service identifier
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn has(&self, service: &str) -> QuickstartResult<bool>;

    async fn get(&self, service: &str) -> QuickstartResult<Option<CredentialFields>>;

    /// Replace the credential set stored under `service`
    async fn set(&self, service: &str, fields: CredentialFields) -> QuickstartResult<()>;
}

/// CRUD persistence for workflows
///
/// Lookups of unknown ids return `None`/`false` rather than an error.
pub trait WorkflowRepository: Send + Sync {
    /// Persist a draft, assigning id and timestamps
    fn create(&self, draft: NewWorkflow) -> QuickstartResult<Workflow>;

    fn get(&self, id: &Uuid) -> QuickstartResult<Option<Workflow>>;

    /// All workflows in creation order
    fn list(&self) -> QuickstartResult<Vec<Workflow>>;

    /// Apply a partial update and bump `updated_at`
    fn update(&self, id: &Uuid, patch: WorkflowPatch) -> QuickstartResult<Option<Workflow>>;

    /// Returns `false` when nothing was deleted
    fn delete(&self, id: &Uuid) -> QuickstartResult<bool>;
}

/// The remote virtual desktop driven by the agent
#[async_trait]
pub trait Desktop: Send + Sync {
    /// Execute a desktop tool call and return its result
    async fn perform(&self, tool_name: &str, args: &Value) -> QuickstartResult<Value>;

    async fn click(&self, x: f64, y: f64) -> QuickstartResult<()> {
        self.perform(
            COMPUTER,
            &json!({"action": "left_click", "coordinate": [x.round() as i64, y.round() as i64]}),
        )
        .await
        .map(|_| ())
    }

    async fn type_text(&self, text: &str) -> QuickstartResult<()> {
        self.perform(COMPUTER, &json!({"action": "type", "text": text}))
            .await
            .map(|_| ())
    }
}
