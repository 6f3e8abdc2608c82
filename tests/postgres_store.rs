//! Postgres store tests.
//!
//! These need a live database and only run when
//! `QUOTA_GATE_TEST_DATABASE_URL` is set; otherwise each test returns early.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use quota_gate::ratelimit::{resolve_window, BucketKey, Category, LimitStore, PostgresStore};

fn store() -> Option<Arc<PostgresStore>> {
    let url = std::env::var("QUOTA_GATE_TEST_DATABASE_URL").ok()?;
    let store = PostgresStore::connect_lazy(&url, 10, Duration::from_secs(10)).unwrap();
    Some(Arc::new(store))
}

fn unique_identity(tag: &str) -> String {
    format!("test-{}-{}", tag, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_schema_setup_succeeds() {
    let Some(store) = store() else { return };

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let url = std::env::var("QUOTA_GATE_TEST_DATABASE_URL").unwrap();
            tokio::spawn(async move {
                let fresh = PostgresStore::connect_lazy(&url, 1, Duration::from_secs(10)).unwrap();
                fresh.ensure_schema().await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }
    store.ensure_schema().await.unwrap();
}

#[tokio::test]
async fn peek_and_consume_round() {
    let Some(store) = store() else { return };
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
    let window = resolve_window(Category::Generation, now);
    let key = BucketKey::new(&unique_identity("peek"), Category::Generation, &window);

    let usage = store.peek(&key, window.end).await.unwrap();
    assert_eq!(usage.count, 0);
    assert_eq!(usage.reset_at, window.end);

    assert_eq!(store.consume(&key, window.end).await.unwrap(), 1);
    assert_eq!(store.consume(&key, window.end).await.unwrap(), 2);

    let usage = store.peek(&key, window.end).await.unwrap();
    assert_eq!(usage.count, 2);
    assert_eq!(usage.reset_at, window.end);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_consumes_lose_no_updates() {
    let Some(store) = store() else { return };
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
    let window = resolve_window(Category::Download, now);
    let key = BucketKey::new(&unique_identity("race"), Category::Download, &window);

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.consume(&key, window.end).await.unwrap() })
        })
        .collect();

    let mut counts: Vec<u64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    counts.sort_unstable();

    assert_eq!(counts, (1..=100).collect::<Vec<u64>>());
    assert_eq!(store.peek(&key, window.end).await.unwrap().count, 100);
}
