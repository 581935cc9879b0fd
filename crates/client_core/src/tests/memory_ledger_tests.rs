use std::sync::Arc;

use super::*;
use crate::gateway::DevSigner;

fn book(id: u64, name: &str, total: u64, available: u64) -> BookSummary {
    BookSummary {
        id: BookId(id),
        name: name.into(),
        total_copies: total,
        available_copies: available,
    }
}

#[tokio::test]
async fn list_available_skips_books_without_copies() {
    let ledger = MemoryLedger::with_books(vec![book(1, "Dune", 2, 2), book(2, "Emma", 1, 0)]);
    let books = ledger.list_available().await.expect("list");
    assert_eq!(books, vec![book(1, "Dune", 2, 2)]);
}

#[tokio::test]
async fn create_applies_only_at_finality() {
    let ledger = MemoryLedger::new();
    let signer = DevSigner::new("alice");

    let handle = ledger.create(&signer, "Dune", 3).await.expect("submit");
    assert!(ledger.list_available().await.expect("list").is_empty());

    let confirmed = ledger.await_finality(&handle).await.expect("finality");
    assert_eq!(confirmed.block_number, Some(BlockNumber(1)));
    assert_eq!(
        ledger.list_available().await.expect("list"),
        vec![book(1, "Dune", 3, 3)]
    );
}

#[tokio::test]
async fn borrow_then_return_round_trips_availability() {
    let ledger = MemoryLedger::with_books(vec![book(5, "Dune", 1, 1)]);
    let signer = DevSigner::new("alice");

    let handle = ledger.borrow(&signer, BookId(5)).await.expect("borrow");
    ledger.await_finality(&handle).await.expect("borrow final");
    assert_eq!(ledger.books().await[0].available_copies, 0);

    let handle = ledger.return_book(&signer, BookId(5)).await.expect("return");
    ledger.await_finality(&handle).await.expect("return final");
    assert_eq!(ledger.books().await[0].available_copies, 1);
}

#[tokio::test]
async fn business_rules_reject_at_submission() {
    let ledger = MemoryLedger::with_books(vec![book(5, "Dune", 1, 0)]);
    let signer = DevSigner::new("alice");

    assert_eq!(
        ledger.borrow(&signer, BookId(5)).await,
        Err(GatewayError::rejected(REASON_NO_COPIES))
    );
    assert_eq!(
        ledger.borrow(&signer, BookId(99)).await,
        Err(GatewayError::rejected(REASON_UNKNOWN_BOOK))
    );
    assert_eq!(
        ledger.return_book(&signer, BookId(5)).await,
        Err(GatewayError::rejected(REASON_NOT_BORROWED))
    );
}

#[tokio::test]
async fn owner_restriction_applies_to_create() {
    let ledger = MemoryLedger::new();
    ledger.set_owner("librarian").await;

    let err = ledger
        .create(&DevSigner::new("mallory"), "Dune", 1)
        .await
        .expect_err("not owner");
    assert_eq!(err, GatewayError::rejected(REASON_NOT_OWNER));
    assert!(ledger
        .create(&DevSigner::new("librarian"), "Dune", 1)
        .await
        .is_ok());
}

#[tokio::test]
async fn finality_rechecks_rules_against_landed_transactions() {
    let ledger = MemoryLedger::with_books(vec![book(5, "Dune", 1, 1)]);
    let alice = DevSigner::new("alice");
    let bob = DevSigner::new("bob");

    let first = ledger.borrow(&alice, BookId(5)).await.expect("alice submit");
    let second = ledger.borrow(&bob, BookId(5)).await.expect("bob submit");

    ledger.await_finality(&first).await.expect("alice final");
    assert_eq!(
        ledger.await_finality(&second).await,
        Err(GatewayError::rejected(REASON_NO_COPIES))
    );
}

#[tokio::test]
async fn manual_finality_waits_for_release() {
    let ledger = Arc::new(MemoryLedger::with_books(vec![book(1, "Dune", 1, 1)]));
    ledger.set_finality(FinalityMode::Manual).await;
    let handle = ledger
        .borrow(&DevSigner::new("alice"), BookId(1))
        .await
        .expect("submit");

    let waiter = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.await_finality(&handle).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    ledger.release_finality(1);
    waiter.await.expect("join").expect("finality");
}

#[tokio::test]
async fn injected_failures_are_consumed_once() {
    let ledger = MemoryLedger::new();
    ledger
        .fail_next_list(GatewayError::Network("connection reset".into()))
        .await;

    assert!(ledger.list_available().await.is_err());
    assert!(ledger.list_available().await.is_ok());
    assert_eq!(ledger.list_calls().await, 2);
}
