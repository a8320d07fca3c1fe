//! Streaming Anthropic Messages API session with client-side tool execution

use std::collections::HashMap;

use async_trait::async_trait;
use cuse_quickstart_sdk::tools::{tool_definitions, COMPUTER};
use cuse_quickstart_sdk::{
    AgentSession, ExecutionMessage, QuickstartError, QuickstartResult, Role,
    ToolInvocation, TurnContext,
};
use futures::StreamExt;
use reqwest_eventsource::{retry, Error as EventSourceError, Event, EventSource};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};


pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const COMPUTER_USE_BETA: &str = "computer-use-2024-10-22";
const COMPUTER_TOOL_TYPE: &str = "computer_20241022";

const SYSTEM_PROMPT: &str = "You are an autonomous computer agent operating an Ubuntu desktop \
on an x86_64 machine. You complete the tasks you are given without supervision.

## How to work
1. Understand the task and break it into small steps before acting.
2. Take a screenshot to analyze the current state of the screen and locate the UI elements you need.
3. Act precisely, using keyboard shortcuts and standard Ubuntu navigation where it helps.
4. Verify the result of every action before moving on.
5. When something fails, analyze what happened, pick a recovery strategy and validate that it worked.

## Applications
- Keep track of open windows, tabs and applications in the dock.

## Authentication
- Use the fill_credentials tool for every login form. Never type credentials yourself.

## IMPORTANT
- You are an autonomous agent and responsible for completing the task.
- Log your progress using the start_subtask tool.";

/// Connection and model settings
#[derive(Debug, Clone)]
pub struct AnthropicOptions {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Upper bound on model round trips per appended message
    pub max_steps: usize,
    pub display_width: u32,
    pub display_height: u32,
    pub display_number: u32,
}

impl Default for AnthropicOptions {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            max_tokens: 4096,
            max_steps: 99,
            display_width: 1024,
            display_height: 768,
            display_number: 1,
        }
    }
}

/// Agent session backed by the Anthropic Messages API
pub struct AnthropicSession {
    client: reqwest::Client,
    options: AnthropicOptions,
    messages: Vec<ExecutionMessage>,
}

impl AnthropicSession {
    pub fn new(options: AnthropicOptions) -> QuickstartResult<Self> {
        if options.api_key.trim().is_empty() {
            return Err(QuickstartError::validation("Anthropic API key is not set"));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(QuickstartError::session)?;
        Ok(Self {
            client,
            options,
            messages: Vec::new(),
        })
    }

    fn tools(&self) -> Vec<Value> {
        let mut tools = vec![json!({
            "type": COMPUTER_TOOL_TYPE,
            "name": COMPUTER,
            "display_width_px": self.options.display_width,
            "display_height_px": self.options.display_height,
            "display_number": self.options.display_number,
        })];
        tools.extend(tool_definitions());
        tools
    }

    fn request_body(&self) -> Value {
        json!({
            "model": self.options.model,
            "max_tokens": self.options.max_tokens,
            "system": SYSTEM_PROMPT,
            "tools": self.tools(),
            "messages": to_api_messages(&self.messages),
            "stream": true,
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.options.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .header("x-api-key", &self.options.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", COMPUTER_USE_BETA)
            .json(&self.request_body())
    }

    /// Stream one assistant turn, reporting partial progress to the observer
    async fn stream_turn(&self, ctx: TurnContext<'_>) -> QuickstartResult<(ExecutionMessage, Option<String>)> {
        let mut source = EventSource::new(self.request()).map_err(QuickstartError::session)?;
        source.set_retry_policy(Box::new(retry::Never));

        let mut turn = TurnBuilder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(QuickstartError::Cancelled),
                next = source.next() => next,
            };
            match next {
                None | Some(Err(EventSourceError::StreamEnded)) => break,
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(event))) => {
                    if turn.apply(&event.data)? {
                        ctx.observer.on_turn(turn.message());
                    }
                }
                Some(Err(EventSourceError::InvalidStatusCode(status, response))) => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(QuickstartError::Session(format!(
                        "Anthropic API returned {}: {}",
                        status, body
                    )));
                }
                Some(Err(err)) => return Err(QuickstartError::session(err)),
            }
        }
        source.close();
        Ok(turn.finish())
    }

    async fn resolve_tools(&mut self, ctx: TurnContext<'_>) -> QuickstartResult<()> {
        let Some(turn) = self.messages.last_mut() else {
            return Ok(());
        };
        for i in 0..turn.tool_invocations.len() {
            if ctx.cancel.is_cancelled() {
                return Err(QuickstartError::Cancelled);
            }
            if turn.tool_invocations[i].is_resolved() {
                continue;
            }
            debug!(tool = %turn.tool_invocations[i].tool_name, "Executing tool call");
            let result = ctx.tools.handle(&turn.tool_invocations[i], ctx.cancel).await;
            turn.tool_invocations[i].resolve(result);
            ctx.observer.on_turn(turn);
        }
        Ok(())
    }
}

#[async_trait]
impl AgentSession for AnthropicSession {
    async fn append(&mut self, message: ExecutionMessage, ctx: TurnContext<'_>) -> QuickstartResult<()> {
        ctx.observer.on_turn(&message);
        self.messages.push(message);

        for step in 0..self.options.max_steps {
            if ctx.cancel.is_cancelled() {
                return Err(QuickstartError::Cancelled);
            }
            let (turn, stop_reason) = self.stream_turn(ctx).await?;
            self.messages.push(turn);

            if stop_reason.as_deref() != Some("tool_use") {
                debug!(step, stop_reason = ?stop_reason, "Agent yielded");
                return Ok(());
            }
            self.resolve_tools(ctx).await?;
        }

        warn!(max_steps = self.options.max_steps, "Agent reached the step limit");
        Ok(())
    }

    fn messages(&self) -> &[ExecutionMessage] {
        &self.messages
    }

    fn reset(&mut self) {
        self.messages.clear();
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockStart { index: usize, content_block: ContentBlock },
    ContentBlockDelta { index: usize, delta: BlockDelta },
    ContentBlockStop { index: usize },
    MessageDelta { delta: MessageDelta },
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}

enum BlockState {
    Text,
    ToolUse { invocation: usize, input: String },
}

/// Accumulates streamed content blocks into one assistant message
struct TurnBuilder {
    message: ExecutionMessage,
    blocks: HashMap<usize, BlockState>,
    stop_reason: Option<String>,
}

impl TurnBuilder {
    fn new() -> Self {
        Self {
            message: ExecutionMessage::assistant(""),
            blocks: HashMap::new(),
            stop_reason: None,
        }
    }

    fn message(&self) -> &ExecutionMessage {
        &self.message
    }

    /// Apply one event payload; returns whether the visible message changed
    fn apply(&mut self, data: &str) -> QuickstartResult<bool> {
        if data.is_empty() {
            return Ok(false);
        }
        let parsed: StreamEvent = serde_json::from_str(data)?;
        let changed = match parsed {
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } => {
                    self.blocks.insert(index, BlockState::Text);
                    self.message.content.push_str(&text);
                    !text.is_empty()
                }
                ContentBlock::ToolUse { id, name } => {
                    self.message
                        .tool_invocations
                        .push(ToolInvocation::pending(id, name, Value::Null));
                    self.blocks.insert(
                        index,
                        BlockState::ToolUse {
                            invocation: self.message.tool_invocations.len() - 1,
                            input: String::new(),
                        },
                    );
                    true
                }
                ContentBlock::Other => false,
            },
            StreamEvent::ContentBlockDelta { index, delta } => match (self.blocks.get_mut(&index), delta) {
                (Some(BlockState::Text), BlockDelta::TextDelta { text }) => {
                    self.message.content.push_str(&text);
                    true
                }
                (Some(BlockState::ToolUse { input, .. }), BlockDelta::InputJsonDelta { partial_json }) => {
                    input.push_str(&partial_json);
                    false
                }
                _ => false,
            },
            StreamEvent::ContentBlockStop { index } => match self.blocks.remove(&index) {
                Some(BlockState::ToolUse { invocation, input }) => {
                    let args = parse_tool_input(&input);
                    if let Some(tool) = self.message.tool_invocations.get_mut(invocation) {
                        tool.args = args;
                    }
                    true
                }
                _ => false,
            },
            StreamEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                false
            }
            StreamEvent::Error { error } => {
                return Err(QuickstartError::Session(format!(
                    "{}: {}",
                    error.kind, error.message
                )));
            }
            StreamEvent::Other => false,
        };
        Ok(changed)
    }

    fn finish(self) -> (ExecutionMessage, Option<String>) {
        (self.message, self.stop_reason)
    }
}

fn parse_tool_input(input: &str) -> Value {
    if input.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(input).unwrap_or_else(|e| {
        warn!(error = %e, "Unparseable tool input");
        json!({})
    })
}

/// Render the transcript in Messages API shape.
///
/// Tool results of an assistant turn follow it as a user message.
pub fn to_api_messages(messages: &[ExecutionMessage]) -> Vec<Value> {
    let mut out = Vec::new();
    for message in messages {
        match message.role {
            Role::User => {
                if !message.content.is_empty() {
                    out.push(json!({"role": "user", "content": message.content}));
                }
            }
            Role::Assistant => {
                let mut content = Vec::new();
                if !message.content.is_empty() {
                    content.push(json!({"type": "text", "text": message.content}));
                }
                for tool in &message.tool_invocations {
                    let input = if tool.args.is_object() {
                        tool.args.clone()
                    } else {
                        json!({})
                    };
                    content.push(json!({
                        "type": "tool_use",
                        "id": tool.tool_call_id,
                        "name": tool.tool_name,
                        "input": input,
                    }));
                }
                if content.is_empty() {
                    continue;
                }
                out.push(json!({"role": "assistant", "content": content}));

                if !message.tool_invocations.is_empty() {
                    let results: Vec<Value> =
                        message.tool_invocations.iter().map(tool_result_block).collect();
                    out.push(json!({"role": "user", "content": results}));
                }
            }
        }
    }
    out
}

fn tool_result_block(tool: &ToolInvocation) -> Value {
    let Some(result) = &tool.result else {
        return json!({
            "type": "tool_result",
            "tool_use_id": tool.tool_call_id,
            "content": "Tool call was not completed.",
            "is_error": true,
        });
    };

    let is_error = result.get("error").is_some();
    let content = match result {
        Value::String(text) => json!(text),
        Value::Object(map) => match map.get("base64_image").and_then(Value::as_str) {
            Some(image) => {
                let mut blocks = Vec::new();
                if let Some(output) = map.get("output").and_then(Value::as_str) {
                    blocks.push(json!({"type": "text", "text": output}));
                }
                blocks.push(json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": "image/png", "data": image},
                }));
                Value::Array(blocks)
            }
            None => match map.get("error") {
                Some(Value::String(error)) => json!(error),
                _ => json!(result.to_string()),
            },
        },
        other => json!(other.to_string()),
    };

    json!({
        "type": "tool_result",
        "tool_use_id": tool.tool_call_id,
        "content": content,
        "is_error": is_error,
    })
}
