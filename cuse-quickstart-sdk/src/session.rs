//! Agent session seam
//!
//! An [`AgentSession`] is the conversational interface to the remote model. The
//! controller appends user messages; the session streams assistant turns back
//! through a [`TurnObserver`] and hands every tool call to a [`ToolHandler`].

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::QuickstartResult;
use crate::types::{ExecutionMessage, ToolInvocation};

/// Resolves tool calls made by the agent
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Produce the result for one tool call. Failures are reported inside the
    /// returned value so the agent can react to them.
    async fn handle(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> Value;
}

/// Receives transcript updates while a turn is in progress
pub trait TurnObserver: Send + Sync {
    /// Called with the latest transcript message every time it changes
    fn on_turn(&self, message: &ExecutionMessage);
}

/// Everything a session needs from its caller for one `append`
#[derive(Clone, Copy)]
pub struct TurnContext<'a> {
    pub tools: &'a dyn ToolHandler,
    pub observer: &'a dyn TurnObserver,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait AgentSession: Send {
    /// Append a message to the transcript and drive the conversation until the
    /// agent yields back (no further tool calls), the call fails, or `cancel`
    /// fires. Turns already committed stay in the transcript.
    async fn append(
        &mut self,
        message: ExecutionMessage,
        ctx: TurnContext<'_>,
    ) -> QuickstartResult<()>;

    /// Current transcript
    fn messages(&self) -> &[ExecutionMessage];

    /// Discard the transcript
    fn reset(&mut self);
}
