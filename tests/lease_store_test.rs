//! Lease exclusivity across independent connection pools on one file.

mod common;

use std::sync::Arc;

use capture_sentinel::adapters::memory::InMemoryLeaseStore;
use capture_sentinel::adapters::sqlite::{initialize_database, SqliteLeaseStore};
use capture_sentinel::domain::models::{AttemptId, ConversationId};
use capture_sentinel::domain::ports::LeaseStore;
use chrono::{Duration, Utc};
use common::temp_db_path;

async fn open_tab(url: &str) -> SqliteLeaseStore {
    let pool = initialize_database(url, None)
        .await
        .expect("Failed to open lease database");
    SqliteLeaseStore::new(pool)
}

#[tokio::test]
async fn test_two_tabs_one_winner() {
    let (_dir, path) = temp_db_path();
    let url = format!("sqlite:{}", path.display());
    let tab_a = open_tab(&url).await;
    let tab_b = open_tab(&url).await;

    let conversation = ConversationId::new("c1");
    let now = Utc::now();
    let a = tab_a
        .claim(&conversation, &AttemptId::new("a1"), Duration::seconds(10), now)
        .await
        .unwrap();
    let b = tab_b
        .claim(&conversation, &AttemptId::new("b1"), Duration::seconds(10), now)
        .await
        .unwrap();

    assert!(a.acquired);
    assert!(!b.acquired);
    assert_eq!(b.owner_attempt_id, Some(AttemptId::new("a1")));

    // Only the holder can release.
    assert!(!tab_b.release(&conversation, &AttemptId::new("b1")).await.unwrap());
    assert!(tab_b.release(&conversation, &AttemptId::new("a1")).await.unwrap());

    let b = tab_b
        .claim(&conversation, &AttemptId::new("b1"), Duration::seconds(10), now)
        .await
        .unwrap();
    assert!(b.acquired);
    let seen_by_a = tab_a.current(&conversation, now).await.unwrap().unwrap();
    assert_eq!(seen_by_a.owner_attempt_id, AttemptId::new("b1"));
}

#[tokio::test]
async fn test_concurrent_claims_have_single_winner() {
    let (_dir, path) = temp_db_path();
    let url = format!("sqlite:{}", path.display());
    let mut stores = Vec::new();
    for _ in 0..4 {
        stores.push(Arc::new(open_tab(&url).await));
    }

    let conversation = ConversationId::new("shared");
    let now = Utc::now();
    let mut handles = Vec::new();
    for (i, store) in stores.iter().enumerate() {
        let store = Arc::clone(store);
        let conversation = conversation.clone();
        handles.push(tokio::spawn(async move {
            store
                .claim(
                    &conversation,
                    &AttemptId::new(format!("tab-{i}")),
                    Duration::seconds(30),
                    now,
                )
                .await
        }));
    }

    let mut winners = 0;
    let mut owners = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.acquired {
            winners += 1;
        }
        owners.push(outcome.owner_attempt_id);
    }
    assert_eq!(winners, 1);
    let first = owners[0].clone();
    assert!(first.is_some());
    assert!(owners.iter().all(|o| *o == first), "Every tab sees the same holder");
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let (_dir, path) = temp_db_path();
    let url = format!("sqlite:{}", path.display());
    let tab_a = open_tab(&url).await;
    let tab_b = open_tab(&url).await;

    let conversation = ConversationId::new("c1");
    let start = Utc::now();
    tab_a
        .claim(&conversation, &AttemptId::new("a1"), Duration::seconds(5), start)
        .await
        .unwrap();

    let later = start + Duration::seconds(6);
    assert!(tab_b.current(&conversation, later).await.unwrap().is_none());
    let b = tab_b
        .claim(&conversation, &AttemptId::new("b1"), Duration::seconds(5), later)
        .await
        .unwrap();
    assert!(b.acquired);

    // The stale holder's release must not clear the new lease.
    assert!(!tab_a.release(&conversation, &AttemptId::new("a1")).await.unwrap());
    assert!(tab_a.current(&conversation, later).await.unwrap().is_some());
}

#[tokio::test]
async fn test_memory_store_matches_sqlite_contract() {
    let store = InMemoryLeaseStore::new();
    let conversation = ConversationId::new("c1");
    let now = Utc::now();

    let a = store
        .claim(&conversation, &AttemptId::new("a1"), Duration::seconds(5), now)
        .await
        .unwrap();
    let renewed = store
        .claim(
            &conversation,
            &AttemptId::new("a1"),
            Duration::seconds(5),
            now + Duration::seconds(1),
        )
        .await
        .unwrap();
    let b = store
        .claim(
            &conversation,
            &AttemptId::new("b1"),
            Duration::seconds(5),
            now + Duration::seconds(4),
        )
        .await
        .unwrap();

    assert!(a.acquired);
    assert!(renewed.acquired);
    assert!(renewed.expires_at > a.expires_at);
    assert!(!b.acquired, "Renewal extended the lease past the second claim");
}
