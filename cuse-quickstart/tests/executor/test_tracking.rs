//! Step tracking through a full run

use super::common::*;
use cuse_quickstart::executor::ExecutionEvent;
use serde_json::json;

fn step_changes(events: &[ExecutionEvent]) -> Vec<(usize, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepChanged { index, step_id } => Some((*index, step_id.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_index_follows_announcements() {
    let h = harness(vec![vec![
        start_subtask("s1"),
        screenshot(),
        start_subtask("s2"),
        reply("logged in"),
    ]]);
    let mut rx = h.executor.subscribe();
    assert_eq!(h.executor.current_step_index(), None);

    let outcome = h.executor.execute(&sample_workflow()).await.unwrap();
    assert!(!outcome.is_stopped());
    assert_eq!(h.executor.current_step_index(), Some(1));

    let events = drain(&mut rx);
    assert_eq!(
        step_changes(&events),
        vec![(0, "s1".to_string()), (1, "s2".to_string())]
    );
}

#[tokio::test]
async fn test_unmatched_turns_keep_index() {
    let h = harness(vec![vec![
        start_subtask("s2"),
        start_subtask("does-not-exist"),
        screenshot(),
        calls(&[
            ("computer", json!({"action": "screenshot"})),
            ("start_subtask", json!({"id": "s1"})),
        ]),
        reply("still working"),
    ]]);

    h.executor.execute(&sample_workflow()).await.unwrap();
    assert_eq!(h.executor.current_step_index(), Some(1));
}

#[tokio::test]
async fn test_only_first_call_of_a_turn_counts() {
    let h = harness(vec![vec![calls(&[
        ("start_subtask", json!({"id": "s1"})),
        ("start_subtask", json!({"id": "s2"})),
    ])]]);

    h.executor.execute(&sample_workflow()).await.unwrap();
    assert_eq!(h.executor.current_step_index(), Some(0));
}

#[tokio::test]
async fn test_index_resets_between_runs() {
    let h = harness(vec![vec![start_subtask("s2")], vec![], vec![reply("again")], vec![]]);
    let workflow = sample_workflow();

    h.executor.execute(&workflow).await.unwrap();
    assert_eq!(h.executor.current_step_index(), Some(1));

    h.executor.execute(&workflow).await.unwrap();
    assert_eq!(h.executor.current_step_index(), None);
}
