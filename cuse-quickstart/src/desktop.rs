//! HTTP bridge to the virtual desktop service

use std::time::Duration;

use async_trait::async_trait;
use cuse_quickstart_sdk::{Desktop, QuickstartError, QuickstartResult};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Sends desktop tool calls as `{"tool": ..., "args": ...}` to `{url}/actions`.
///
/// The service answers with the tool result as JSON. A body carrying an
/// `error` field is treated as a failed action.
pub struct HttpDesktop {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDesktop {
    pub fn new(url: &str, timeout: Duration) -> QuickstartResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(QuickstartError::desktop)?;
        Ok(Self {
            client,
            endpoint: format!("{}/actions", url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Desktop for HttpDesktop {
    async fn perform(&self, tool_name: &str, args: &Value) -> QuickstartResult<Value> {
        debug!(tool = %tool_name, endpoint = %self.endpoint, "Calling desktop");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({"tool": tool_name, "args": args}))
            .send()
            .await
            .map_err(QuickstartError::desktop)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(tool = %tool_name, %status, "Desktop backend error: {}", text);
            return Err(QuickstartError::Desktop(format!(
                "desktop backend error ({}): {}",
                status, text
            )));
        }

        let body: Value = resp.json().await.map_err(QuickstartError::desktop)?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(QuickstartError::Desktop(message));
        }
        Ok(body)
    }
}
