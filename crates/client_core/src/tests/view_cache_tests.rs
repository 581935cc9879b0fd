use std::{sync::Arc, time::Duration};

use shared::domain::{BookId, BookSummary};

use super::*;
use crate::{gateway::DevSigner, memory_ledger::MemoryLedger};

fn dune(available: u64) -> BookSummary {
    BookSummary {
        id: BookId(1),
        name: "Dune".into(),
        total_copies: 3,
        available_copies: available,
    }
}

#[tokio::test]
async fn new_cache_is_stale_and_presents_loading() {
    let cache = ViewCache::new();
    assert!(cache.is_stale().await);
    assert!(cache.current().await.is_empty());
    assert_eq!(cache.presentation().await, ViewPresentation::Loading);
}

#[tokio::test]
async fn successful_refresh_replaces_snapshot() {
    let ledger = MemoryLedger::with_books(vec![dune(3)]);
    let cache = ViewCache::new();

    let snapshot = cache.refresh(&ledger).await.expect("refresh");
    assert_eq!(snapshot.items, vec![dune(3)]);
    assert!(snapshot.fetched_at.is_some());
    assert!(!cache.is_stale().await);
    assert_eq!(
        cache.presentation().await,
        ViewPresentation::Populated(snapshot)
    );
}

#[tokio::test]
async fn empty_registry_presents_empty_once_loaded() {
    let ledger = MemoryLedger::new();
    let cache = ViewCache::new();
    cache.refresh(&ledger).await.expect("refresh");
    assert_eq!(cache.presentation().await, ViewPresentation::Empty);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_snapshot() {
    let ledger = MemoryLedger::with_books(vec![dune(3)]);
    let cache = ViewCache::new();
    let before = cache.refresh(&ledger).await.expect("first refresh");

    let err = GatewayError::Unavailable("503".into());
    ledger.fail_next_list(err.clone()).await;
    assert_eq!(cache.refresh(&ledger).await, Err(err.clone()));

    assert_eq!(cache.current().await, before);
    assert!(!cache.is_stale().await);
    assert_eq!(cache.last_refresh_error().await, Some(err));
}

#[tokio::test]
async fn failed_first_refresh_stays_stale() {
    let ledger = MemoryLedger::new();
    ledger
        .fail_next_list(GatewayError::Network("connection refused".into()))
        .await;
    let cache = ViewCache::new();

    assert!(cache.refresh(&ledger).await.is_err());
    assert!(cache.is_stale().await);
    assert_eq!(cache.presentation().await, ViewPresentation::Loading);
}

#[tokio::test]
async fn mark_stale_is_cleared_by_next_refresh() {
    let ledger = MemoryLedger::with_books(vec![dune(3)]);
    let cache = ViewCache::new();
    cache.refresh(&ledger).await.expect("refresh");

    cache.mark_stale().await;
    assert!(cache.is_stale().await);

    cache.refresh(&ledger).await.expect("refresh");
    assert!(!cache.is_stale().await);
}

#[tokio::test(start_paused = true)]
async fn slow_read_started_before_write_cannot_roll_back_view() {
    let ledger = Arc::new(MemoryLedger::with_books(vec![dune(3)]));
    let cache = Arc::new(ViewCache::new());
    cache.refresh(ledger.as_ref()).await.expect("initial");

    ledger.set_read_delay(Some(Duration::from_secs(5))).await;
    let slow_read = {
        let cache = cache.clone();
        let ledger = ledger.clone();
        tokio::spawn(async move { cache.refresh(ledger.as_ref()).await })
    };
    while ledger.list_calls().await < 2 {
        tokio::task::yield_now().await;
    }
    assert!(cache.is_refreshing().await);
    ledger.set_read_delay(None).await;

    let signer = DevSigner::new("alice");
    let handle = ledger.borrow(&signer, BookId(1)).await.expect("borrow");
    ledger.await_finality(&handle).await.expect("final");
    cache.mark_stale().await;

    cache.refresh(ledger.as_ref()).await.expect("fresh read");
    assert_eq!(cache.current().await.items, vec![dune(2)]);
    assert!(!cache.is_stale().await);

    let returned = slow_read.await.expect("join").expect("slow read");
    assert_eq!(returned.items, vec![dune(2)]);
    assert_eq!(cache.current().await.items, vec![dune(2)]);
    assert!(!cache.is_stale().await);
    assert!(!cache.is_refreshing().await);
}

#[tokio::test(start_paused = true)]
async fn read_issued_before_confirmed_write_leaves_view_stale() {
    let ledger = Arc::new(MemoryLedger::with_books(vec![dune(3)]));
    let cache = Arc::new(ViewCache::new());
    cache.refresh(ledger.as_ref()).await.expect("initial");

    ledger.set_read_delay(Some(Duration::from_secs(5))).await;
    let early_read = {
        let cache = cache.clone();
        let ledger = ledger.clone();
        tokio::spawn(async move { cache.refresh(ledger.as_ref()).await })
    };
    while ledger.list_calls().await < 2 {
        tokio::task::yield_now().await;
    }

    cache.mark_stale().await;
    early_read.await.expect("join").expect("read");

    assert_eq!(cache.current().await.items, vec![dune(3)]);
    assert!(cache.is_stale().await);
    assert_eq!(cache.presentation().await, ViewPresentation::Loading);
}

#[tokio::test(start_paused = true)]
async fn abandoned_refresh_is_not_reported_as_in_flight() {
    let ledger = MemoryLedger::with_books(vec![dune(3)]);
    ledger.set_read_delay(Some(Duration::from_secs(5))).await;
    let cache = ViewCache::new();

    let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.refresh(&ledger)).await;

    assert!(abandoned.is_err());
    assert!(!cache.is_refreshing().await);
    assert!(cache.is_stale().await);

    ledger.set_read_delay(None).await;
    cache.refresh(&ledger).await.expect("refresh");
    assert_eq!(cache.current().await.items, vec![dune(3)]);
}
