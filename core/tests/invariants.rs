//! Property tests: random interleavings of reservations, payment outcomes,
//! redeliveries, clock jumps and sweeps never break ticket ownership.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use proptest::prelude::*;
use raffle_core::types::{PurchaseId, PurchaseStatus, RaffleId, TicketStatus};
use raffle_testing::fixtures::{BUYER, CREATOR, Harness};
use std::collections::HashMap;

const TICKETS: u32 = 8;

#[derive(Clone, Debug)]
enum Op {
    Reserve(Vec<u32>),
    Approve(usize),
    Reject(usize),
    Redeliver(usize),
    Advance(i64),
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(1..=TICKETS, 1..4).prop_map(|mut numbers| {
            numbers.sort_unstable();
            numbers.dedup();
            Op::Reserve(numbers)
        }),
        2 => any::<usize>().prop_map(Op::Approve),
        1 => any::<usize>().prop_map(Op::Reject),
        1 => any::<usize>().prop_map(Op::Redeliver),
        1 => (1i64..20).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
    ]
}

fn check_invariants(h: &Harness, raffle_id: RaffleId, purchases: &[PurchaseId]) {
    let mut owners: HashMap<u32, PurchaseId> = HashMap::new();

    for number in 1..=TICKETS {
        let ticket = h.store.ticket(raffle_id, number).unwrap();
        match ticket.status {
            TicketStatus::Available => {
                assert_eq!(ticket.purchase_id, None);
                assert_eq!(ticket.hold_expires_at, None);
            }
            TicketStatus::Pending => {
                let owner = h.store.purchase(ticket.purchase_id.unwrap()).unwrap();
                assert!(
                    PurchaseStatus::OPEN.contains(&owner.status),
                    "pending ticket {number} owned by {:?} purchase",
                    owner.status
                );
                assert!(owner.numbers.contains(&number));
                owners.insert(number, owner.id);
            }
            TicketStatus::Sold => {
                let owner = h.store.purchase(ticket.purchase_id.unwrap()).unwrap();
                assert_eq!(owner.status, PurchaseStatus::Approved);
                owners.insert(number, owner.id);
            }
        }
    }

    for id in purchases {
        let purchase = h.store.purchase(*id).unwrap();
        let held = purchase
            .numbers
            .iter()
            .filter(|n| owners.get(n) == Some(id))
            .count();
        match purchase.status {
            PurchaseStatus::Approved => assert_eq!(held, purchase.numbers.len()),
            PurchaseStatus::Rejected | PurchaseStatus::Expired => assert_eq!(held, 0),
            PurchaseStatus::PendingPayment => assert_eq!(held, purchase.numbers.len()),
            PurchaseStatus::Initiated => {}
        }
    }

    let approved = purchases
        .iter()
        .filter(|id| h.store.purchase(**id).unwrap().status == PurchaseStatus::Approved)
        .count();
    assert!(h.notifier.count_to(BUYER) <= approved);
    assert!(h.notifier.count_to(CREATOR) <= approved);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ticket_ownership_stays_consistent(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let h = Harness::new();
            let raffle = h.active_raffle(TICKETS, 100).await;
            let mut purchases: Vec<PurchaseId> = Vec::new();

            for op in ops {
                match op {
                    Op::Reserve(numbers) => {
                        if let Ok(reservation) = h.reserve(raffle.id, numbers).await {
                            purchases.push(reservation.purchase_id);
                        }
                    }
                    Op::Approve(_) | Op::Reject(_) | Op::Redeliver(_) if purchases.is_empty() => {}
                    Op::Approve(i) => {
                        let id = purchases[i % purchases.len()];
                        let payment = format!("pay-{id}");
                        h.gateway.approve(&payment, id);
                        h.engine.reconcile_payment(&payment).await.expect("reconcile");
                    }
                    Op::Reject(i) => {
                        let id = purchases[i % purchases.len()];
                        let payment = format!("pay-{id}");
                        h.gateway.reject(&payment, id);
                        h.engine.reconcile_payment(&payment).await.expect("reconcile");
                    }
                    Op::Redeliver(i) => {
                        let id = purchases[i % purchases.len()];
                        h.engine.reconcile_purchase(id).await.expect("reconcile");
                    }
                    Op::Advance(minutes) => h.clock.advance(Duration::minutes(minutes)),
                    Op::Sweep => {
                        h.sweeper.sweep(None).await.expect("sweep");
                    }
                }
                check_invariants(&h, raffle.id, &purchases);
            }
        });
    }
}
