//! Error type shared by the controller and its collaborators

use std::fmt::Display;
use thiserror::Error;

/// Errors surfaced by workflow persistence, credential handling and agent sessions
#[derive(Debug, Error)]
pub enum QuickstartError {
    /// A Credential Store or Workflow Repository write/read failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The agent session call failed
    #[error("agent session error: {0}")]
    Session(String),

    /// The in-flight call was cancelled by a stop request
    #[error("execution cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("a workflow is already executing")]
    AlreadyExecuting,

    #[error("workflow '{0}' has no steps")]
    EmptyWorkflow(String),

    /// A credential request form may only be submitted once
    #[error("credentials for '{0}' were already submitted")]
    AlreadySubmitted(String),

    #[error("desktop error: {0}")]
    Desktop(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QuickstartError {
    pub fn persistence(err: impl Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn session(err: impl Display) -> Self {
        Self::Session(err.to_string())
    }

    pub fn desktop(err: impl Display) -> Self {
        Self::Desktop(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether this error is the result of a cooperative stop
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for quickstart operations
pub type QuickstartResult<T> = Result<T, QuickstartError>;
