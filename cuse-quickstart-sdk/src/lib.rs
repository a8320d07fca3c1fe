//! Shared types and collaborator traits for cuse-quickstart
//!
//! The workflow controller lives in the `cuse-quickstart` crate; this crate
//! holds what the controller and its collaborators (agent session, credential
//! store, workflow repository, desktop) have to agree on.

pub mod error;
pub mod session;
pub mod store;
pub mod tools;
pub mod types;

// Re-export async trait for convenience
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

pub use error::{QuickstartError, QuickstartResult};
pub use session::{AgentSession, ToolHandler, TurnContext, TurnObserver};
pub use store::{CredentialStore, Desktop, WorkflowRepository};
pub use tools::{CredentialRequestPayload, FillCredentials, ToolCall};
pub use types::{
    AuthElement, AuthFieldKind, Coordinates, CredentialFields, ExecutionMessage, KeychainItem,
    NewWorkflow, Role, ToolInvocation, ToolInvocationState, Workflow, WorkflowPatch, WorkflowStep,
};
