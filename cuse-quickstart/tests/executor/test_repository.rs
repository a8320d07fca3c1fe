//! Workflow persistence through the store

use std::sync::Arc;

use cuse_quickstart::database::Database;
use cuse_quickstart::memory::{InMemoryCredentialStore, InMemoryWorkflowRepository};
use cuse_quickstart::store::WorkflowStore;
use cuse_quickstart_sdk::{CredentialStore, KeychainItem, NewWorkflow, WorkflowPatch, WorkflowStep};
use uuid::Uuid;

fn draft(steps: usize) -> NewWorkflow {
    let mut draft = NewWorkflow::new("Create a contact");
    draft.steps = (0..steps)
        .map(|i| WorkflowStep::with_id(format!("step-{}", i), format!("do thing {}", i)))
        .collect();
    draft.keychain_items = vec![KeychainItem {
        service: "hubspot".to_string(),
        email: Some("me@example.com".to_string()),
        ..Default::default()
    }];
    draft
}

fn stores() -> Vec<(&'static str, WorkflowStore, tempfile::TempDir)> {
    let dir = tempfile::tempdir().unwrap();
    let database = Arc::new(Database::open(dir.path().join("quickstart.db")).unwrap());
    let sqlite = WorkflowStore::new(database.clone(), database);
    let memory = WorkflowStore::new(
        Arc::new(InMemoryWorkflowRepository::new()),
        Arc::new(InMemoryCredentialStore::new()),
    );
    vec![
        ("sqlite", sqlite, dir),
        ("memory", memory, tempfile::tempdir().unwrap()),
    ]
}

#[tokio::test]
async fn test_step_order_survives_round_trip() {
    for (name, store, _dir) in stores() {
        let saved = store.save_workflow(draft(12)).await.unwrap();
        let fetched = store.require_workflow(&saved.id).unwrap();
        let ids: Vec<_> = fetched.steps.iter().map(|s| s.id.clone()).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("step-{}", i)).collect();
        assert_eq!(ids, expected, "{}", name);
        assert_eq!(fetched, saved, "{}", name);
    }
}

#[tokio::test]
async fn test_delete_unknown_leaves_store_unchanged() {
    for (name, store, _dir) in stores() {
        let saved = store.save_workflow(draft(2)).await.unwrap();
        let before = store.list_workflows().unwrap();

        assert!(!store.delete_workflow(&Uuid::new_v4()).unwrap(), "{}", name);
        assert_eq!(store.list_workflows().unwrap(), before, "{}", name);

        assert!(store.delete_workflow(&saved.id).unwrap(), "{}", name);
        assert!(!store.delete_workflow(&saved.id).unwrap(), "{}", name);
        assert!(store.get_workflow(&saved.id).unwrap().is_none(), "{}", name);
    }
}

#[tokio::test]
async fn test_update_reorders_steps_and_bumps_timestamp() {
    for (name, store, _dir) in stores() {
        let saved = store.save_workflow(draft(3)).await.unwrap();
        let mut reversed = saved.steps.clone();
        reversed.reverse();

        let updated = store
            .update_workflow(
                &saved.id,
                WorkflowPatch {
                    steps: Some(reversed.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.steps, reversed, "{}", name);
        assert_eq!(updated.name, saved.name, "{}", name);
        assert!(updated.updated_at >= saved.updated_at, "{}", name);
        assert_eq!(
            store.require_workflow(&saved.id).unwrap().steps,
            reversed,
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_keychain_items_reach_the_credential_store() {
    for (name, store, _dir) in stores() {
        store.save_workflow(draft(1)).await.unwrap();
        let fields = store.credentials().get("hubspot").await.unwrap().unwrap();
        assert_eq!(fields["email"], "me@example.com", "{}", name);
    }
}
