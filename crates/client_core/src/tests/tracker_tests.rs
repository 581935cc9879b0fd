use super::*;

fn borrow(id: u64) -> OperationKey {
    OperationKey::for_item(OperationKind::Borrow, BookId(id))
}

#[test]
fn untouched_key_reports_idle() {
    let tracker = OperationTracker::new();
    let state = tracker.state_of(OperationKey::kind_only(OperationKind::Create));
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.last_error.is_none());
}

#[test]
fn full_lifecycle_reaches_settled() {
    let mut tracker = OperationTracker::new();
    let key = borrow(1);

    tracker.begin(key).expect("begin");
    tracker.await_finality(key, "0xabc").expect("await");
    let state = tracker.settle(key).expect("settle");

    assert_eq!(state.phase, Phase::Settled);
    assert_eq!(state.tx_id.as_deref(), Some("0xabc"));
    assert!(state.last_error.is_none());
}

#[test]
fn begin_rejects_key_already_in_flight() {
    let mut tracker = OperationTracker::new();
    let key = borrow(5);
    tracker.begin(key).expect("first begin");

    let err = tracker.begin(key).expect_err("second begin must fail");
    assert_eq!(err.from, Phase::Submitting);

    tracker.await_finality(key, "0x1").expect("await");
    let err = tracker.begin(key).expect_err("still in flight");
    assert_eq!(err.from, Phase::AwaitingFinality);
}

#[test]
fn begin_after_failure_clears_previous_error() {
    let mut tracker = OperationTracker::new();
    let key = borrow(2);
    tracker.begin(key).expect("begin");
    tracker.fail(key, "no copies available").expect("fail");

    let state = tracker.begin(key).expect("retry");
    assert_eq!(state.phase, Phase::Submitting);
    assert!(state.last_error.is_none());
}

#[test]
fn failure_is_isolated_to_its_key() {
    let mut tracker = OperationTracker::new();
    let create = OperationKey::kind_only(OperationKind::Create);
    let give_back = OperationKey::for_item(OperationKind::Return, BookId(5));

    tracker.begin(create).expect("begin create");
    tracker.begin(give_back).expect("begin return");
    tracker.await_finality(give_back, "0x5").expect("await return");
    tracker.fail(create, "caller is not the owner").expect("fail create");

    assert_eq!(tracker.state_of(give_back).phase, Phase::AwaitingFinality);
    assert!(tracker.state_of(give_back).last_error.is_none());
    tracker.settle(give_back).expect("settle return");
    assert_eq!(tracker.state_of(create).phase, Phase::Failed);
}

#[test]
fn empty_reason_falls_back_to_generic_message() {
    let mut tracker = OperationTracker::new();
    let key = borrow(3);
    tracker.begin(key).expect("begin");
    let state = tracker.fail(key, "  ").expect("fail");
    assert_eq!(state.last_error.as_deref(), Some("transaction failed"));
}

#[test]
fn settle_requires_awaiting_finality() {
    let mut tracker = OperationTracker::new();
    let key = borrow(4);

    let err = tracker.settle(key).expect_err("idle cannot settle");
    assert_eq!(err.from, Phase::Idle);

    tracker.begin(key).expect("begin");
    let err = tracker.settle(key).expect_err("submitting cannot settle");
    assert_eq!(err.from, Phase::Submitting);
}

#[test]
fn fail_requires_in_flight_phase() {
    let mut tracker = OperationTracker::new();
    let key = borrow(6);
    assert!(tracker.fail(key, "boom").is_err());
}

#[test]
fn in_flight_reports_per_kind() {
    let mut tracker = OperationTracker::new();
    tracker.begin(borrow(1)).expect("begin");
    assert!(tracker.in_flight(OperationKind::Borrow));
    assert!(!tracker.in_flight(OperationKind::Return));
}

#[test]
fn granularity_maps_requests_to_keys() {
    let request = MutationRequest::BorrowItem { id: BookId(9) };
    assert_eq!(TrackingGranularity::PerItem.key_for(&request), borrow(9));
    assert_eq!(
        TrackingGranularity::PerKind.key_for(&request),
        OperationKey::kind_only(OperationKind::Borrow)
    );

    let create = MutationRequest::CreateItem {
        name: "Dune".into(),
        copies: 3,
    };
    assert_eq!(
        TrackingGranularity::PerItem.key_for(&create),
        OperationKey::kind_only(OperationKind::Create)
    );
}

#[test]
fn granularity_parses_from_settings_strings() {
    assert_eq!(
        "per-kind".parse::<TrackingGranularity>(),
        Ok(TrackingGranularity::PerKind)
    );
    assert_eq!(
        "PER_ITEM".parse::<TrackingGranularity>(),
        Ok(TrackingGranularity::PerItem)
    );
    assert!("per-day".parse::<TrackingGranularity>().is_err());
}

#[test]
fn states_are_ordered_by_kind_then_item() {
    let mut tracker = OperationTracker::new();
    tracker
        .begin(OperationKey::for_item(OperationKind::Return, BookId(1)))
        .expect("return");
    tracker.begin(borrow(7)).expect("borrow 7");
    tracker.begin(borrow(2)).expect("borrow 2");
    tracker
        .begin(OperationKey::kind_only(OperationKind::Create))
        .expect("create");

    let keys: Vec<_> = tracker.states().into_iter().map(|s| s.key.to_string()).collect();
    assert_eq!(keys, vec!["create", "borrow#2", "borrow#7", "return#1"]);
}
