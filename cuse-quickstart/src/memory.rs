//! In-memory workflow repository and credential store
//!
//! Used by tests and by the `--ephemeral` CLI mode; nothing survives the process.

use chrono::Utc;
use cuse_quickstart_sdk::{
    async_trait, CredentialFields, CredentialStore, NewWorkflow, QuickstartError,
    QuickstartResult, Workflow, WorkflowPatch, WorkflowRepository,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> QuickstartResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| QuickstartError::persistence("in-memory store lock poisoned"))
}

/// Workflows kept in a vector, which doubles as creation order
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Mutex<Vec<Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    fn create(&self, draft: NewWorkflow) -> QuickstartResult<Workflow> {
        let workflow = Workflow::from_draft(draft, Utc::now());
        lock(&self.workflows)?.push(workflow.clone());
        Ok(workflow)
    }

    fn get(&self, id: &Uuid) -> QuickstartResult<Option<Workflow>> {
        Ok(lock(&self.workflows)?.iter().find(|w| &w.id == id).cloned())
    }

    fn list(&self) -> QuickstartResult<Vec<Workflow>> {
        Ok(lock(&self.workflows)?.clone())
    }

    fn update(&self, id: &Uuid, patch: WorkflowPatch) -> QuickstartResult<Option<Workflow>> {
        let mut workflows = lock(&self.workflows)?;
        Ok(workflows.iter_mut().find(|w| &w.id == id).map(|workflow| {
            workflow.apply(patch, Utc::now());
            workflow.clone()
        }))
    }

    fn delete(&self, id: &Uuid) -> QuickstartResult<bool> {
        let mut workflows = lock(&self.workflows)?;
        let before = workflows.len();
        workflows.retain(|w| &w.id != id);
        Ok(workflows.len() != before)
    }
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    items: Mutex<HashMap<String, CredentialFields>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one credential set
    pub fn with_service(service: impl Into<String>, fields: CredentialFields) -> Self {
        let store = Self::default();
        if let Ok(mut items) = store.items.lock() {
            items.insert(service.into(), fields);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn has(&self, service: &str) -> QuickstartResult<bool> {
        Ok(lock(&self.items)?.contains_key(service))
    }

    async fn get(&self, service: &str) -> QuickstartResult<Option<CredentialFields>> {
        Ok(lock(&self.items)?.get(service).cloned())
    }

    async fn set(&self, service: &str, fields: CredentialFields) -> QuickstartResult<()> {
        lock(&self.items)?.insert(service.to_string(), fields);
        Ok(())
    }
}
