//! Credential intercept for fill_credentials

use super::common::*;
use cuse_quickstart::executor::{ExecutionEvent, FILL_SUCCESS};
use cuse_quickstart::memory::InMemoryCredentialStore;
use cuse_quickstart_sdk::tools::{COMPUTER, REQUEST_CREDENTIALS};
use cuse_quickstart_sdk::{AuthFieldKind, CredentialStore, QuickstartError};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_unknown_service_asks_the_user() {
    let h = harness(vec![vec![start_subtask("s2"), fill_credentials("example")]]);
    let mut rx = h.executor.subscribe();

    let outcome = h.executor.execute(&sample_workflow()).await.unwrap();

    let results = tool_results(outcome.transcript());
    let payload = results.last().unwrap();
    assert_eq!(payload["type"], REQUEST_CREDENTIALS);
    assert_eq!(payload["service"], "example");
    assert_eq!(payload["actions"][1]["type"], "password");

    assert!(h.credentials.is_empty());
    assert!(h.desktop.calls().is_empty());

    let request = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            ExecutionEvent::CredentialsRequested(request) => Some(request),
            _ => None,
        })
        .expect("credential request event");
    assert_eq!(request.service(), "example");
    assert_eq!(
        request.field_kinds(),
        vec![AuthFieldKind::Email, AuthFieldKind::Password]
    );
    assert_eq!(h.executor.pending_credential_requests().len(), 1);

    assert_ok!(
        request
            .submit([
                (AuthFieldKind::Email, "me@example.com"),
                (AuthFieldKind::Password, "hunter2"),
            ])
            .await
    );
    let stored = h.credentials.get("example").await.unwrap().unwrap();
    assert_eq!(stored, example_fields());
    assert!(h.executor.pending_credential_requests().is_empty());

    let again = request.submit([(AuthFieldKind::Password, "other")]).await;
    assert!(matches!(assert_err!(again), QuickstartError::AlreadySubmitted(_)));
    assert_eq!(h.credentials.get("example").await.unwrap().unwrap(), example_fields());
}

#[tokio::test]
async fn test_known_service_is_filled_directly() {
    let store = InMemoryCredentialStore::with_service("example", example_fields());
    let h = harness_with_store(vec![vec![fill_credentials("example")]], store);
    let mut rx = h.executor.subscribe();

    let outcome = h.executor.execute(&sample_workflow()).await.unwrap();
    assert_eq!(tool_results(outcome.transcript()), vec![json!(FILL_SUCCESS)]);

    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CredentialsRequested(_))));
    assert!(h.executor.pending_credential_requests().is_empty());

    let calls = h.desktop.calls();
    assert_eq!(
        calls,
        vec![
            (COMPUTER.to_string(), json!({"action": "left_click", "coordinate": [100, 200]})),
            (COMPUTER.to_string(), json!({"action": "type", "text": "me@example.com"})),
            (COMPUTER.to_string(), json!({"action": "left_click", "coordinate": [100, 260]})),
            (COMPUTER.to_string(), json!({"action": "type", "text": "hunter2"})),
        ]
    );
}

#[tokio::test]
async fn test_desktop_calls_pass_through() {
    let h = harness(vec![vec![screenshot()]]);
    let outcome = h.executor.execute(&sample_workflow()).await.unwrap();

    assert_eq!(tool_results(outcome.transcript()), vec![json!({"output": "ok"})]);
    assert_eq!(
        h.desktop.calls(),
        vec![(COMPUTER.to_string(), json!({"action": "screenshot"}))]
    );
}
