//! One-shot credential collection raised by the `fill_credentials` intercept

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cuse_quickstart_sdk::{
    AuthElement, AuthFieldKind, CredentialFields, CredentialRequestPayload, CredentialStore,
    QuickstartError, QuickstartResult,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A pending request for the user to type credentials for a service.
///
/// The request is resolved at most once. After a successful submission it is
/// closed for good; a failed write leaves it open so the user can retry.
pub struct CredentialRequest {
    tool_call_id: String,
    payload: CredentialRequestPayload,
    store: Arc<dyn CredentialStore>,
    submit_lock: Mutex<()>,
    submitted: AtomicBool,
}

impl CredentialRequest {
    pub fn new(
        tool_call_id: impl Into<String>,
        payload: CredentialRequestPayload,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            payload,
            store,
            submit_lock: Mutex::new(()),
            submitted: AtomicBool::new(false),
        }
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    pub fn service(&self) -> &str {
        &self.payload.service
    }

    pub fn actions(&self) -> &[AuthElement] {
        &self.payload.actions
    }

    /// Distinct field kinds to ask the user for, in form order
    pub fn field_kinds(&self) -> Vec<AuthFieldKind> {
        self.payload.field_kinds()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    /// Store the entered values under the requested service.
    ///
    /// Values for kinds the form did not ask for and blank values are dropped.
    pub async fn submit<I, V>(&self, values: I) -> QuickstartResult<()>
    where
        I: IntoIterator<Item = (AuthFieldKind, V)>,
        V: Into<String>,
    {
        let _guard = self.submit_lock.lock().await;
        if self.is_submitted() {
            return Err(QuickstartError::AlreadySubmitted(self.service().to_string()));
        }

        let wanted = self.field_kinds();
        let fields: CredentialFields = values
            .into_iter()
            .filter(|(kind, _)| wanted.contains(kind))
            .map(|(kind, value)| (kind.as_str().to_string(), value.into()))
            .filter(|(_, value)| !value.is_empty())
            .collect();

        if fields.is_empty() {
            return Err(QuickstartError::validation(format!(
                "no credentials entered for {}",
                self.service()
            )));
        }

        if let Err(e) = self.store.set(self.service(), fields).await {
            warn!(service = %self.service(), error = %e, "Failed to store credentials");
            return Err(e);
        }

        self.submitted.store(true, Ordering::Release);
        info!(service = %self.service(), "Credentials stored");
        Ok(())
    }
}

impl fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("tool_call_id", &self.tool_call_id)
            .field("service", &self.payload.service)
            .field("actions", &self.payload.actions.len())
            .field("submitted", &self.is_submitted())
            .finish()
    }
}
