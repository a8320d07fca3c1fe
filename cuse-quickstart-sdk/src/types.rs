//! Workflow, keychain and transcript types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{QuickstartError, QuickstartResult};

/// Credential field name -> value, as stored under a service in the keychain
pub type CredentialFields = BTreeMap<String, String>;

/// One natural-language step of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Opaque identifier, unique within its workflow. Generated when omitted.
    #[serde(default = "generate_step_id")]
    pub id: String,
    pub description: String,
}

fn generate_step_id() -> String {
    Uuid::new_v4().to_string()
}

impl WorkflowStep {
    /// Create a step with a freshly generated id
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: generate_step_id(),
            description: description.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// Named credential set attached to a workflow
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeychainItem {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl KeychainItem {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// Credential fields with a non-empty value, keyed by field name.
    ///
    /// This is the map written to the credential store when a workflow is saved.
    pub fn fields(&self) -> CredentialFields {
        [
            ("username", &self.username),
            ("password", &self.password),
            ("token", &self.token),
            ("email", &self.email),
            ("phone", &self.phone),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
    }
}

/// A persisted workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    /// Execution order
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub keychain_items: Vec<KeychainItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Materialize a draft, assigning id and timestamps
    pub fn from_draft(draft: NewWorkflow, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            steps: draft.steps,
            keychain_items: draft.keychain_items,
            created_at: now,
            updated_at: now,
        }
    }

    /// Position of the step with the given id
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    /// Apply a partial update. `id` and `created_at` are left untouched.
    pub fn apply(&mut self, patch: WorkflowPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(steps) = patch.steps {
            self.steps = steps;
        }
        if let Some(items) = patch.keychain_items {
            self.keychain_items = items;
        }
        self.updated_at = now.max(self.created_at);
    }
}

/// Client-side workflow draft, before an id is assigned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub keychain_items: Vec<KeychainItem>,
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a step with a generated id
    pub fn step(mut self, description: impl Into<String>) -> Self {
        self.steps.push(WorkflowStep::new(description));
        self
    }

    pub fn keychain_item(mut self, item: KeychainItem) -> Self {
        self.keychain_items.push(item);
        self
    }

    /// Check the rules a draft must satisfy before it can be saved
    pub fn validate(&self) -> QuickstartResult<()> {
        if self.name.trim().is_empty() {
            return Err(QuickstartError::validation("workflow name must not be empty"));
        }
        validate_steps(&self.steps)?;
        validate_keychain_items(&self.keychain_items)
    }
}

/// Partial update of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<WorkflowStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keychain_items: Option<Vec<KeychainItem>>,
}

impl WorkflowPatch {
    pub fn validate(&self) -> QuickstartResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(QuickstartError::validation("workflow name must not be empty"));
            }
        }
        if let Some(steps) = &self.steps {
            validate_steps(steps)?;
        }
        if let Some(items) = &self.keychain_items {
            validate_keychain_items(items)?;
        }
        Ok(())
    }
}

fn validate_steps(steps: &[WorkflowStep]) -> QuickstartResult<()> {
    if steps.is_empty() {
        return Err(QuickstartError::validation("workflow needs at least one step"));
    }
    for (index, step) in steps.iter().enumerate() {
        if step.description.trim().is_empty() {
            return Err(QuickstartError::validation(format!(
                "step {} has an empty description",
                index + 1
            )));
        }
        if steps[..index].iter().any(|other| other.id == step.id) {
            return Err(QuickstartError::validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    Ok(())
}

fn validate_keychain_items(items: &[KeychainItem]) -> QuickstartResult<()> {
    for (index, item) in items.iter().enumerate() {
        if item.service.trim().is_empty() {
            return Err(QuickstartError::validation(format!(
                "credential set {} is missing a service",
                index + 1
            )));
        }
    }
    Ok(())
}

/// Transcript author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolInvocationState {
    Pending,
    Result,
}

/// A structured tool request within one assistant turn, and its result once resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ToolInvocation {
    pub fn pending(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            state: ToolInvocationState::Pending,
            result: None,
        }
    }

    pub fn resolve(&mut self, result: serde_json::Value) {
        self.result = Some(result);
        self.state = ToolInvocationState::Result;
    }

    pub fn is_resolved(&self) -> bool {
        self.state == ToolInvocationState::Result
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl ExecutionMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            tool_invocations: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            tool_invocations: Vec::new(),
        }
    }

    pub fn with_tool_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.tool_invocations.push(invocation);
        self
    }

    pub fn first_tool_invocation(&self) -> Option<&ToolInvocation> {
        self.tool_invocations.first()
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        self.tool_invocations.iter().any(|t| !t.is_resolved())
    }
}

/// Semantic kind of a login form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFieldKind {
    Password,
    Email,
    Username,
    Token,
    Phone,
    Otp,
}

impl AuthFieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFieldKind::Password => "password",
            AuthFieldKind::Email => "email",
            AuthFieldKind::Username => "username",
            AuthFieldKind::Token => "token",
            AuthFieldKind::Phone => "phone",
            AuthFieldKind::Otp => "otp",
        }
    }

    /// Whether the value should be masked when echoed
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            AuthFieldKind::Password | AuthFieldKind::Token | AuthFieldKind::Otp
        )
    }
}

impl fmt::Display for AuthFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screen position in desktop pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// A field the agent intends to fill: what kind and where it is on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthElement {
    #[serde(rename = "type")]
    pub kind: AuthFieldKind,
    pub coordinates: Coordinates,
}
