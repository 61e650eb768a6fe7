//! End-to-end checkout scenarios over the in-memory doubles.
//!
//! Each test reserves tickets, lets the scripted gateway settle (or not), and
//! checks the resulting ticket, purchase and email state.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used, clippy::panic)]

use chrono::Duration;
use raffle_core::error::RaffleError;
use raffle_core::gateway::{GatewayError, Resolution};
use raffle_core::reconciliation::ReconcileOutcome;
use raffle_core::types::{PurchaseStatus, TicketStatus};
use raffle_testing::fixtures::{BUYER, CREATOR, Harness};

/// Scenario A: approved payment sells the tickets and sends one email each.
#[tokio::test]
async fn test_approved_payment_sells_tickets() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;

    let reservation = h.reserve(raffle.id, vec![7, 3]).await.expect("reserve");
    assert_eq!(reservation.numbers, vec![3, 7]);
    assert_eq!(reservation.amount.cents(), 1000);

    for number in [3, 7] {
        let ticket = h.store.ticket(raffle.id, number).expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(ticket.purchase_id, Some(reservation.purchase_id));
        assert_eq!(ticket.hold_expires_at, Some(reservation.hold_expires_at));
    }
    let purchase = h.store.purchase(reservation.purchase_id).expect("purchase");
    assert_eq!(purchase.status, PurchaseStatus::PendingPayment);
    assert_eq!(purchase.preference_id.as_deref(), Some(reservation.preference_id.as_str()));

    h.gateway.approve("pay-1", reservation.purchase_id);
    let outcome = h.engine.reconcile_payment("pay-1").await.expect("reconcile");

    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            purchase_id: reservation.purchase_id,
            resolution: Resolution::Approved,
        }
    );
    for number in [3, 7] {
        let ticket = h.store.ticket(raffle.id, number).expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Sold);
        assert_eq!(ticket.purchase_id, Some(reservation.purchase_id));
    }
    let purchase = h.store.purchase(reservation.purchase_id).expect("purchase");
    assert_eq!(purchase.status, PurchaseStatus::Approved);
    assert_eq!(purchase.payment_id.as_deref(), Some("pay-1"));
    assert!(purchase.emailed_buyer && purchase.emailed_creator);
    assert_eq!(h.notifier.count_to(BUYER), 1);
    assert_eq!(h.notifier.count_to(CREATOR), 1);
}

/// Scenario B: rejected payment releases the tickets, no emails.
#[tokio::test]
async fn test_rejected_payment_releases_tickets() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    let reservation = h.reserve(raffle.id, vec![3, 7]).await.expect("reserve");

    h.gateway.reject("pay-1", reservation.purchase_id);
    let outcome = h.engine.reconcile_payment("pay-1").await.expect("reconcile");

    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            purchase_id: reservation.purchase_id,
            resolution: Resolution::Rejected,
        }
    );
    for number in [3, 7] {
        let ticket = h.store.ticket(raffle.id, number).expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Available);
        assert_eq!(ticket.purchase_id, None);
        assert_eq!(ticket.hold_expires_at, None);
    }
    assert_eq!(
        h.store.purchase(reservation.purchase_id).expect("purchase").status,
        PurchaseStatus::Rejected
    );
    assert!(h.notifier.sent().is_empty());

    // Released tickets can be bought again right away.
    h.reserve(raffle.id, vec![3]).await.expect("re-reserve");
}

/// Scenario C: no payment ever arrives, the sweeper reclaims the hold.
#[tokio::test]
async fn test_abandoned_hold_is_swept() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    let reservation = h.reserve(raffle.id, vec![5]).await.expect("reserve");

    // Inside the hold: nothing to do.
    h.clock.advance(Duration::minutes(10));
    let report = h.sweeper.sweep(None).await.expect("sweep");
    assert_eq!(report.expired, 0);

    h.clock.advance(Duration::minutes(6));
    let report = h.sweeper.sweep(None).await.expect("sweep");
    assert_eq!(report.expired, 1);
    assert_eq!(report.released, 1);

    let ticket = h.store.ticket(raffle.id, 5).expect("ticket");
    assert_eq!(ticket.status, TicketStatus::Available);
    assert_eq!(ticket.purchase_id, None);
    assert_eq!(
        h.store.purchase(reservation.purchase_id).expect("purchase").status,
        PurchaseStatus::Expired
    );
}

/// Scenario D: duplicate webhook delivery is a no-op.
#[tokio::test]
async fn test_duplicate_delivery_is_noop() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    let reservation = h.reserve(raffle.id, vec![4]).await.expect("reserve");
    h.gateway.approve("pay-1", reservation.purchase_id);

    h.engine.reconcile_payment("pay-1").await.expect("first");
    let before = h.store.purchase(reservation.purchase_id).expect("purchase");
    let second = h.engine.reconcile_payment("pay-1").await.expect("second");

    assert_eq!(
        second,
        ReconcileOutcome::AlreadyApplied {
            purchase_id: reservation.purchase_id
        }
    );
    assert_eq!(h.store.purchase(reservation.purchase_id).expect("purchase"), before);
    assert_eq!(h.store.ticket(raffle.id, 4).expect("ticket").status, TicketStatus::Sold);
    assert_eq!(h.notifier.count_to(BUYER), 1);
    assert_eq!(h.notifier.count_to(CREATOR), 1);
}

/// Test: concurrent duplicate deliveries still send each email once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    let reservation = h.reserve(raffle.id, vec![1, 2]).await.expect("reserve");
    h.gateway.approve("pay-1", reservation.purchase_id);
    h.gateway.set_delay(std::time::Duration::from_millis(5));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.reconcile_payment("pay-1").await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let outcome = handle.await.expect("join").expect("reconcile");
        if matches!(outcome, ReconcileOutcome::Applied { .. }) {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(h.notifier.count_to(BUYER), 1);
    assert_eq!(h.notifier.count_to(CREATOR), 1);
}

/// Test: overlapping reservations never both succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_reservations_one_wins() {
    let h = Harness::new();

    for _ in 0..25 {
        let raffle = h.active_raffle(10, 100).await;
        let (a, b) = (h.clone(), h.clone());
        let first = tokio::spawn(async move { a.reserve(raffle.id, vec![1, 2, 3]).await });
        let second = tokio::spawn(async move { b.reserve(raffle.id, vec![3, 4]).await });

        let results = [first.await.expect("join"), second.await.expect("join")];
        let wins: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(wins.len(), 1, "exactly one reservation must win: {results:?}");

        let loss = results
            .iter()
            .find_map(|r| r.as_ref().err())
            .expect("one loser");
        match loss {
            RaffleError::TicketsUnavailable { numbers } => assert!(numbers.contains(&3)),
            other => panic!("unexpected error: {other:?}"),
        }

        let counts = h.raffles.ticket_grid(raffle.id).await.expect("grid").counts;
        assert_eq!(counts.pending as usize, wins[0].numbers.len());
    }
}

/// Test: an approval racing the sweep of its expired hold ends either fully
/// sold or fully released, never a mix.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_approval_racing_sweep() {
    let (mut sold, mut released) = (0, 0);

    for _ in 0..200 {
        let h = Harness::new();
        let raffle = h.active_raffle(6, 100).await;
        let reservation = h.reserve(raffle.id, vec![1, 2, 3]).await.expect("reserve");
        h.gateway.approve("pay-1", reservation.purchase_id);
        h.clock.advance(Duration::minutes(20));

        let engine = h.engine.clone();
        let sweeper = h.sweeper.clone();
        let approval = tokio::spawn(async move { engine.reconcile_payment("pay-1").await });
        let sweep = tokio::spawn(async move { sweeper.sweep(Some(raffle.id)).await });
        approval.await.expect("join").expect("reconcile");
        sweep.await.expect("join").expect("sweep");

        let purchase = h.store.purchase(reservation.purchase_id).expect("purchase");
        let tickets: Vec<_> = [1, 2, 3]
            .iter()
            .map(|n| h.store.ticket(raffle.id, *n).expect("ticket"))
            .collect();
        match purchase.status {
            PurchaseStatus::Approved => {
                sold += 1;
                for ticket in &tickets {
                    assert_eq!(ticket.status, TicketStatus::Sold, "{tickets:?}");
                    assert_eq!(ticket.purchase_id, Some(reservation.purchase_id));
                }
            }
            PurchaseStatus::Expired => {
                released += 1;
                for ticket in &tickets {
                    assert_eq!(ticket.status, TicketStatus::Available, "{tickets:?}");
                    assert_eq!(ticket.purchase_id, None);
                }
            }
            other => panic!("purchase left {other:?} with tickets {tickets:?}"),
        }
    }

    assert_eq!(sold + released, 200);
}

/// Test: gateway failure rolls the reservation back completely.
#[tokio::test]
async fn test_gateway_failure_rolls_back() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    h.gateway.fail_preferences_with(GatewayError::Timeout);

    let err = h.reserve(raffle.id, vec![2, 8]).await.expect_err("must fail");

    assert!(matches!(err, RaffleError::Gateway(GatewayError::Timeout)));
    assert!(err.is_retryable());
    for number in [2, 8] {
        assert_eq!(h.store.ticket(raffle.id, number).expect("ticket").status, TicketStatus::Available);
    }
    let purchases = h.store.purchases_for(raffle.id);
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].status, PurchaseStatus::Expired);
}

/// Test: a datastore failure mid-claim releases what was already claimed.
#[tokio::test]
async fn test_ticket_write_failure_rolls_back() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    h.store.break_ticket(7);

    let err = h.reserve(raffle.id, vec![3, 7]).await.expect_err("must fail");

    assert!(matches!(err, RaffleError::Fatal(_)));
    assert_eq!(h.store.ticket(raffle.id, 3).expect("ticket").status, TicketStatus::Available);
    assert_eq!(h.store.purchases_for(raffle.id)[0].status, PurchaseStatus::Expired);
    assert!(h.gateway.preference_requests().is_empty());
}

/// Test: a conflicting reservation leaves nothing behind and names the taken numbers.
#[tokio::test]
async fn test_conflict_reports_taken_numbers() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    h.reserve(raffle.id, vec![3]).await.expect("first");

    let err = h.reserve(raffle.id, vec![2, 3]).await.expect_err("conflict");

    assert_eq!(err, RaffleError::TicketsUnavailable { numbers: vec![3] });
    assert_eq!(err.code(), "tickets_not_available");
    assert_eq!(h.store.ticket(raffle.id, 2).expect("ticket").status, TicketStatus::Available);
    assert_eq!(h.gateway.preference_requests().len(), 1);
}

/// Test: the preference carries the total and the reconciliation metadata.
#[tokio::test]
async fn test_preference_request_contents() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 250).await;
    let reservation = h.reserve(raffle.id, vec![1, 2, 3]).await.expect("reserve");

    let requests = h.gateway.preference_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.purchase_id, reservation.purchase_id);
    assert_eq!(request.raffle_id, raffle.id);
    assert_eq!(request.quantity, 3);
    assert_eq!(request.total().map(|m| m.cents()), Some(750));
    assert_eq!(request.expires_at, reservation.hold_expires_at);
    assert!(request.urls.success_url.contains(&reservation.purchase_id.to_string()));
}

/// Test: bad input is rejected before anything is written.
#[tokio::test]
async fn test_validation_has_no_side_effects() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;

    for numbers in [vec![], vec![3, 3], vec![0], vec![11]] {
        let err = h.reserve(raffle.id, numbers).await.expect_err("invalid");
        assert!(matches!(err, RaffleError::Validation(_)), "{err:?}");
    }

    let unknown = raffle_core::types::RaffleId::new();
    assert_eq!(
        h.reserve(unknown, vec![1]).await.expect_err("unknown"),
        RaffleError::RaffleNotFound(unknown)
    );

    h.raffles.close(raffle.id).await.expect("close");
    assert!(matches!(
        h.reserve(raffle.id, vec![1]).await,
        Err(RaffleError::Validation(_))
    ));

    assert!(h.store.purchases_for(raffle.id).is_empty());
    assert!(h.gateway.preference_requests().is_empty());
}

/// Test: the sweeper never releases a sold ticket.
#[tokio::test]
async fn test_expiry_does_not_revert_sold() {
    let h = Harness::new();
    let raffle = h.active_raffle(10, 500).await;
    let reservation = h.reserve(raffle.id, vec![5]).await.expect("reserve");
    h.gateway.approve("pay-1", reservation.purchase_id);
    h.engine.reconcile_payment("pay-1").await.expect("reconcile");

    h.clock.advance(Duration::hours(1));
    let report = h.sweeper.sweep(None).await.expect("sweep");

    assert_eq!(report.expired, 0);
    assert_eq!(report.repaired, 0);
    assert_eq!(h.store.ticket(raffle.id, 5).expect("ticket").status, TicketStatus::Sold);
    assert_eq!(
        h.store.purchase(reservation.purchase_id).expect("purchase").status,
        PurchaseStatus::Approved
    );
}
