//! Tool vocabulary understood by the workflow controller
//!
//! The agent session reports tool invocations with a name and free-form JSON
//! arguments. [`ToolCall::parse`] turns the ones the controller cares about into
//! typed values; everything else belongs to the opaque desktop action family.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{QuickstartError, QuickstartResult};
use crate::types::{AuthElement, AuthFieldKind, ToolInvocation};

pub const START_SUBTASK: &str = "start_subtask";
pub const WAIT: &str = "wait";
pub const FILL_CREDENTIALS: &str = "fill_credentials";
pub const COMPUTER: &str = "computer";

/// `type` tag of the payload returned when credentials must be entered by the user
pub const REQUEST_CREDENTIALS: &str = "request_credentials";

/// Arguments of a `fill_credentials` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillCredentials {
    pub service: String,
    #[serde(default)]
    pub actions: Vec<AuthElement>,
}

/// A typed tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    StartSubtask { id: String },
    Wait { seconds: f64 },
    FillCredentials(FillCredentials),
    /// Screenshot, click, type, ... passed through untouched
    Desktop { name: String, args: Value },
}

#[derive(Deserialize)]
struct StartSubtaskArgs {
    id: String,
}

#[derive(Deserialize)]
struct WaitArgs {
    #[serde(default)]
    seconds: Option<f64>,
}

impl ToolCall {
    /// Interpret a tool name and its arguments.
    ///
    /// Fails only when a known tool carries malformed arguments, including a
    /// `fill_credentials` call without any form fields.
    pub fn parse(name: &str, args: &Value) -> QuickstartResult<Self> {
        let call = match name {
            START_SUBTASK => {
                let parsed: StartSubtaskArgs = serde_json::from_value(args.clone())?;
                ToolCall::StartSubtask { id: parsed.id }
            }
            WAIT => {
                let parsed: WaitArgs = if args.is_null() {
                    WaitArgs { seconds: None }
                } else {
                    serde_json::from_value(args.clone())?
                };
                ToolCall::Wait {
                    seconds: parsed.seconds.unwrap_or(1.0),
                }
            }
            FILL_CREDENTIALS => {
                let fill: FillCredentials = serde_json::from_value(args.clone())?;
                if fill.actions.is_empty() {
                    return Err(QuickstartError::validation(format!(
                        "no form fields given for {}",
                        fill.service
                    )));
                }
                ToolCall::FillCredentials(fill)
            }
            other => ToolCall::Desktop {
                name: other.to_string(),
                args: args.clone(),
            },
        };
        Ok(call)
    }

    pub fn from_invocation(invocation: &ToolInvocation) -> QuickstartResult<Self> {
        Self::parse(&invocation.tool_name, &invocation.args)
    }
}

/// Result payload asking the user to supply credentials for a service
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRequestPayload {
    pub service: String,
    pub actions: Vec<AuthElement>,
}

impl CredentialRequestPayload {
    pub fn to_value(&self) -> Value {
        json!({
            "type": REQUEST_CREDENTIALS,
            "service": self.service,
            "actions": self.actions,
        })
    }

    /// Recognize a tool result produced by [`CredentialRequestPayload::to_value`]
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("type").and_then(Value::as_str) != Some(REQUEST_CREDENTIALS) {
            return None;
        }
        let fill: FillCredentials = serde_json::from_value(value.clone()).ok()?;
        Some(Self {
            service: fill.service,
            actions: fill.actions,
        })
    }

    /// Field kinds to ask for, in action order without repeats
    pub fn field_kinds(&self) -> Vec<AuthFieldKind> {
        let mut kinds = Vec::new();
        for action in &self.actions {
            if !kinds.contains(&action.kind) {
                kinds.push(action.kind);
            }
        }
        kinds
    }
}

/// JSON schemas for the tools the controller itself answers
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": START_SUBTASK,
            "description": "Use this tool to start working on a specific subtask to log your progress.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "The id of the subtask to approach next"}
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": WAIT,
            "description": "Wait for the screen to settle before the next action.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "seconds": {
                        "type": "number",
                        "description": "The number of seconds to wait. One second should be enough in most cases."
                    }
                }
            }
        }),
        json!({
            "name": FILL_CREDENTIALS,
            "description": "Fill in a login form for a service using the keychain. If the keychain does not know the service the user is asked for the credentials instead.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "service": {"type": "string", "description": "Service identifier in the keychain"},
                    "actions": {
                        "type": "array",
                        "description": "The elements to be filled in",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": {
                                    "type": "string",
                                    "enum": ["password", "email", "username", "token", "phone", "otp"],
                                    "description": "The type of element to be filled in"
                                },
                                "coordinates": {
                                    "type": "object",
                                    "properties": {
                                        "x": {"type": "number", "description": "The x coordinate of the element"},
                                        "y": {"type": "number", "description": "The y coordinate of the element"}
                                    },
                                    "required": ["x", "y"]
                                }
                            },
                            "required": ["type", "coordinates"]
                        }
                    }
                },
                "required": ["service", "actions"]
            }
        }),
    ]
}
