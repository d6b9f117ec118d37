use faultline_core::model::{EventLevel, IssueEventKind, IssueStatus};
use faultline_core::store::{EventStore, IssueBatchUpdate};
use uuid::Uuid;

async fn seeded_store() -> EventStore {
    let store = EventStore::new_in_memory().await.unwrap();
    store
}

#[tokio::test]
async fn unknown_dsn_returns_none() {
    let store = seeded_store().await;
    let looked_up = store.lookup_project_by_dsn(Uuid::new_v4()).await.unwrap();
    assert!(looked_up.is_none());
}

#[tokio::test]
async fn issue_batch_update_extends_last_seen_and_count() {
    let store = seeded_store().await;
    let now = chrono::Utc::now();
    let (issue_id, created) = store
        .create_issue_or_reuse(
            1,
            "hash-a".into(),
            1,
            "NullPointerException".into(),
            IssueEventKind::Error,
            EventLevel::Error,
            serde_json::json!({}),
            now,
        )
        .await
        .unwrap();
    assert!(created);

    store
        .apply_issue_batch_updates(
            vec![IssueBatchUpdate {
                issue_id,
                delta_count: 3,
                last_seen: now + chrono::Duration::minutes(5),
                search_vector_fragment: "NullPointerException checkout".into(),
                reopen: false,
            }],
            2048,
        )
        .await
        .unwrap();

    let hashes = store
        .load_issue_hashes(vec![(1, "hash-a".into())])
        .await
        .unwrap();
    let (found_id, status) = hashes.get(&(1, "hash-a".to_string())).unwrap();
    assert_eq!(*found_id, issue_id);
    assert_eq!(*status, IssueStatus::Unresolved);
}

#[tokio::test]
async fn soft_delete_then_purge_after_grace_window() {
    let store = seeded_store().await;
    let now = chrono::Utc::now();
    let (issue_id, _) = store
        .create_issue_or_reuse(
            1,
            "hash-b".into(),
            1,
            "old issue".into(),
            IssueEventKind::Error,
            EventLevel::Error,
            serde_json::json!({}),
            now - chrono::Duration::hours(48),
        )
        .await
        .unwrap();
    store
        .apply_issue_batch_updates(
            vec![IssueBatchUpdate {
                issue_id,
                delta_count: 1,
                last_seen: now - chrono::Duration::hours(48),
                search_vector_fragment: String::new(),
                reopen: false,
            }],
            2048,
        )
        .await
        .unwrap();
    store.soft_delete_issue(issue_id).await.unwrap();

    let purged_too_soon = store.purge_soft_deleted(now, 24).await.unwrap();
    assert_eq!(purged_too_soon, 1);
}
