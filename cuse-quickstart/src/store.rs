//! Workflow store: repository access plus the keychain side effect
//!
//! Saving a workflow also pushes its credential sets to the credential store
//! so the agent can authenticate without asking the user. A workflow is only
//! persisted once all of its credential sets were written.

use cuse_quickstart_sdk::{
    CredentialStore, KeychainItem, NewWorkflow, QuickstartError, QuickstartResult, Workflow,
    WorkflowPatch, WorkflowRepository,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Constructor-injected access to workflows and the keychain
#[derive(Clone)]
pub struct WorkflowStore {
    repository: Arc<dyn WorkflowRepository>,
    credentials: Arc<dyn CredentialStore>,
}

impl WorkflowStore {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            repository,
            credentials,
        }
    }

    pub fn credentials(&self) -> Arc<dyn CredentialStore> {
        self.credentials.clone()
    }

    /// Validate and persist a draft, writing its credential sets first
    pub async fn save_workflow(&self, draft: NewWorkflow) -> QuickstartResult<Workflow> {
        draft.validate()?;
        self.save_keychain_items(&draft.keychain_items).await?;

        let workflow = self.repository.create(draft)?;
        info!(
            "Saved workflow {} ({}) with {} step(s)",
            workflow.id,
            workflow.name,
            workflow.steps.len()
        );
        Ok(workflow)
    }

    /// Apply a partial update. Returns `None` when the workflow does not exist.
    pub async fn update_workflow(
        &self,
        id: &Uuid,
        patch: WorkflowPatch,
    ) -> QuickstartResult<Option<Workflow>> {
        patch.validate()?;
        if self.repository.get(id)?.is_none() {
            return Ok(None);
        }
        if let Some(items) = &patch.keychain_items {
            self.save_keychain_items(items).await?;
        }
        self.repository.update(id, patch)
    }

    pub fn get_workflow(&self, id: &Uuid) -> QuickstartResult<Option<Workflow>> {
        self.repository.get(id)
    }

    /// Like [`WorkflowStore::get_workflow`] but a missing workflow is an error
    pub fn require_workflow(&self, id: &Uuid) -> QuickstartResult<Workflow> {
        self.repository
            .get(id)?
            .ok_or_else(|| QuickstartError::not_found(format!("workflow {}", id)))
    }

    pub fn list_workflows(&self) -> QuickstartResult<Vec<Workflow>> {
        self.repository.list()
    }

    /// Returns `false` when no workflow with this id exists
    pub fn delete_workflow(&self, id: &Uuid) -> QuickstartResult<bool> {
        let deleted = self.repository.delete(id)?;
        if !deleted {
            warn!("Delete requested for unknown workflow {}", id);
        }
        Ok(deleted)
    }

    /// Write every credential set to the keychain, stopping at the first failure.
    ///
    /// Items without any field only name a service; its credentials are
    /// collected from the user when the agent first needs them.
    pub async fn save_keychain_items(&self, items: &[KeychainItem]) -> QuickstartResult<()> {
        for item in items {
            let fields = item.fields();
            if fields.is_empty() {
                debug!("Keychain item for '{}' has no fields, skipping", item.service);
                continue;
            }
            self.credentials
                .set(&item.service, fields)
                .await
                .map_err(|e| {
                    QuickstartError::persistence(format!(
                        "failed to save keychain item for '{}': {}",
                        item.service, e
                    ))
                })?;
        }
        Ok(())
    }
}
