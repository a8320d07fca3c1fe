//! Full runs against a scripted agent session

use super::common::*;
use cuse_quickstart::executor::{
    build_instruction, ExecutionEvent, ExecutorOptions, CONTINUE_MESSAGE,
};
use cuse_quickstart::memory::InMemoryCredentialStore;
use cuse_quickstart_sdk::tools::REQUEST_CREDENTIALS;
use cuse_quickstart_sdk::{QuickstartError, Role};

#[tokio::test]
async fn test_instruction_then_credential_request() {
    let h = harness(vec![
        vec![
            start_subtask("s1"),
            screenshot(),
            start_subtask("s2"),
            fill_credentials("example"),
            reply("Waiting for the user to enter credentials."),
        ],
        vec![reply("done")],
    ]);
    let mut rx = h.executor.subscribe();
    let workflow = sample_workflow();

    let outcome = h.executor.execute(&workflow).await.unwrap();
    let transcript = outcome.transcript();

    let user: Vec<_> = transcript
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(user.len(), 2);
    assert!(user[0].starts_with(
        "Execute the following workflow:\nsubtask_id: s1: open app\nsubtask_id: s2: login"
    ));
    assert_eq!(user[0], build_instruction(&workflow, None));
    assert_eq!(user[1], CONTINUE_MESSAGE);
    assert_eq!(transcript[0].role, Role::User);

    let request = transcript
        .iter()
        .flat_map(|m| m.tool_invocations.iter())
        .find(|t| t.tool_name == "fill_credentials")
        .and_then(|t| t.result.clone())
        .unwrap();
    assert_eq!(request["type"], REQUEST_CREDENTIALS);
    assert_eq!(request["service"], "example");
    assert!(h.desktop.calls().iter().all(|(_, args)| args["action"] == "screenshot"));

    assert_eq!(h.executor.current_step_index(), Some(1));
    assert!(!h.executor.is_executing());
    assert_eq!(h.executor.transcript(), transcript);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(ExecutionEvent::Started { workflow_id }) if *workflow_id == workflow.id));
    assert!(matches!(events.last(), Some(ExecutionEvent::Finished)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CredentialsRequested(_))));
}

#[tokio::test]
async fn test_process_hints_are_appended() {
    let session = ScriptedSession::new(vec![]);
    let executor = cuse_quickstart::executor::WorkflowExecutor::new(
        session,
        std::sync::Arc::new(InMemoryCredentialStore::new()),
        std::sync::Arc::new(RecordingDesktop::default()),
    )
    .with_options(ExecutorOptions {
        process_hints: Some("1. Use the search bar to find contacts.".to_string()),
        ..Default::default()
    });

    let outcome = executor.execute(&sample_workflow()).await.unwrap();
    let first = &outcome.transcript()[0].content;
    assert!(first.ends_with("PROCESS HINTS:\n1. Use the search bar to find contacts."));
}

#[tokio::test]
async fn test_session_failure_ends_the_run() {
    let h = harness(vec![vec![
        start_subtask("s1"),
        Turn::Fail("connection reset".to_string()),
    ]]);
    let mut rx = h.executor.subscribe();

    let result = h.executor.execute(&sample_workflow()).await;
    assert!(matches!(result, Err(QuickstartError::Session(ref m)) if m == "connection reset"));
    assert!(!h.executor.is_executing());
    assert_eq!(h.executor.current_step_index(), Some(0));

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::Failed { error }) if error.contains("connection reset")
    ));

    // reusable after a failure
    let rerun = h.executor.execute(&sample_workflow()).await.unwrap();
    assert!(!rerun.is_stopped());
}
