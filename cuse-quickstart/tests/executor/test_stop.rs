//! Stop semantics and run exclusivity

use std::time::Duration;

use super::common::*;
use chrono::Utc;
use cuse_quickstart::executor::ExecutionEvent;
use cuse_quickstart_sdk::{QuickstartError, Workflow};
use uuid::Uuid;

#[tokio::test]
async fn test_stop_when_idle_is_a_no_op() {
    let h = harness(vec![]);
    let mut rx = h.executor.subscribe();

    assert!(!h.executor.stop());
    assert!(!h.executor.is_executing());
    assert_eq!(h.executor.current_step_index(), None);
    assert!(h.executor.transcript().is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_stop_while_running_halts_transcript() {
    let h = harness(vec![vec![
        start_subtask("s1"),
        Turn::ReplyAfterCancel("late reply".to_string()),
    ]]);
    let mut rx = h.executor.subscribe();
    let workflow = sample_workflow();

    let run = {
        let executor = h.executor.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move { executor.execute(&workflow).await })
    };

    h.reached.notified().await;
    assert!(h.executor.is_executing());
    let before = h.executor.transcript();

    assert!(h.executor.stop());
    assert!(!h.executor.is_executing());
    assert!(!h.executor.stop());

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should end after stop")
        .unwrap()
        .unwrap();
    assert!(outcome.is_stopped());
    assert_eq!(outcome.transcript(), before.as_slice());
    assert!(outcome.transcript().iter().all(|m| m.content != "late reply"));
    assert_eq!(h.executor.transcript(), before);
    assert_eq!(h.executor.current_step_index(), Some(0));

    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(ExecutionEvent::Stopped)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::Finished)));
}

#[tokio::test]
async fn test_second_run_is_rejected_while_running() {
    let h = harness(vec![vec![Turn::BlockUntilCancelled]]);
    let workflow = sample_workflow();

    let run = {
        let executor = h.executor.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move { executor.execute(&workflow).await })
    };
    h.reached.notified().await;

    let second = h.executor.execute(&workflow).await;
    assert!(matches!(second, Err(QuickstartError::AlreadyExecuting)));

    h.executor.stop();
    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.is_stopped());
}

#[tokio::test]
async fn test_wait_is_interrupted_by_stop() {
    let h = harness(vec![vec![call(
        "wait",
        serde_json::json!({"seconds": 60}),
    )]]);
    let workflow = sample_workflow();

    let run = {
        let executor = h.executor.clone();
        tokio::spawn(async move { executor.execute(&workflow).await })
    };

    // Give the run time to reach the wait
    while !h.executor.is_executing() {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.executor.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("wait should not outlive stop")
        .unwrap()
        .unwrap();
    assert!(outcome.is_stopped());
}

#[tokio::test]
async fn test_workflow_without_steps_is_rejected() {
    let h = harness(vec![]);
    let now = Utc::now();
    let empty = Workflow {
        id: Uuid::new_v4(),
        name: "empty".to_string(),
        steps: Vec::new(),
        keychain_items: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    let result = h.executor.execute(&empty).await;
    assert!(matches!(result, Err(QuickstartError::EmptyWorkflow(_))));
    assert!(!h.executor.is_executing());
}
