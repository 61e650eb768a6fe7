//! Expiry sweeper.
//!
//! Reclaims abandoned holds. A sweep expires every open purchase whose hold
//! (plus a grace period) has passed, releasing the tickets it still holds,
//! then repairs tickets left `pending` behind a purchase that already ended.
//!
//! The sweep is safe against reconciliation running at the same time: the
//! purchase moves to `expired` only through a compare-and-set from an open
//! status, and tickets are released only while still `pending` for that
//! purchase. A sold ticket is never touched.

use crate::config::SweeperConfig;
use crate::environment::Clock;
use crate::error::RaffleError;
use crate::reconciliation::{ReconcileOutcome, ReconciliationEngine};
use crate::store::Datastore;
use crate::types::{Purchase, PurchaseStatus, RaffleId, Ticket, TicketTransition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Summary of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Overdue open purchases examined
    pub scanned: u32,
    /// Purchases moved to `expired` by this sweep
    pub expired: u32,
    /// Tickets released for expired purchases
    pub released: u32,
    /// Purchases settled from the gateway instead of expiring
    pub resolved: u32,
    /// Orphaned tickets repaired
    pub repaired: u32,
    /// Purchases that changed concurrently and were left alone
    pub skipped: u32,
    /// Purchases or tickets that failed and will be retried next sweep
    pub failed: u32,
}

/// Releases expired holds.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn Datastore>,
    engine: ReconciliationEngine,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    /// Create a sweeper. The engine is only used when
    /// [`SweeperConfig::verify_with_gateway`] is set.
    #[must_use]
    pub fn new(
        store: Arc<dyn Datastore>,
        engine: ReconciliationEngine,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            config,
        }
    }

    /// Run one sweep, optionally limited to one raffle.
    ///
    /// Idempotent: a second sweep right after the first finds nothing to do.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` if the overdue purchases or tickets cannot be listed.
    /// Failures on individual rows are counted in the report.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, raffle_id: Option<RaffleId>) -> Result<SweepReport, RaffleError> {
        let cutoff = self.clock.now() - self.config.grace;
        let mut report = SweepReport::default();

        let purchases = self
            .store
            .list_expired_purchases(cutoff, raffle_id, self.config.batch_size)
            .await?;

        for purchase in purchases {
            report.scanned += 1;

            if self.config.verify_with_gateway
                && purchase.status == PurchaseStatus::PendingPayment
                && self.settled_at_gateway(&purchase).await
            {
                report.resolved += 1;
                continue;
            }

            match self.expire(&purchase).await {
                Ok(Some(released)) => {
                    report.expired += 1;
                    report.released += released;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(purchase_id = %purchase.id, error = %e, "Failed to expire purchase");
                }
            }
        }

        let orphans = self
            .store
            .list_expired_holds(cutoff, raffle_id, self.config.batch_size)
            .await?;

        for ticket in orphans {
            match self.repair(&ticket).await {
                Ok(true) => report.repaired += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        raffle_id = %ticket.raffle_id,
                        number = ticket.number,
                        error = %e,
                        "Failed to repair ticket"
                    );
                }
            }
        }

        metrics::counter!("raffle_swept_purchases_total").increment(u64::from(report.expired));
        if report != SweepReport::default() {
            tracing::info!(?report, "Sweep finished");
        }
        Ok(report)
    }

    /// Whether the gateway already settled the purchase, in which case
    /// reconciliation applied it and it must not be expired.
    async fn settled_at_gateway(&self, purchase: &Purchase) -> bool {
        match self.engine.reconcile_purchase(purchase.id).await {
            Ok(ReconcileOutcome::Applied { .. } | ReconcileOutcome::AlreadyApplied { .. }) => true,
            Ok(ReconcileOutcome::Skipped(_)) => false,
            Err(e) => {
                // An unreachable gateway cannot keep tickets held; a late
                // approval is still recorded when it arrives.
                tracing::warn!(purchase_id = %purchase.id, error = %e, "Gateway check failed, expiring anyway");
                false
            }
        }
    }

    /// Expire one purchase. Returns the number of tickets released, or `None`
    /// if the purchase had already left its open status.
    async fn expire(&self, purchase: &Purchase) -> Result<Option<u32>, RaffleError> {
        let won = self
            .store
            .transition_purchase(purchase.id, &PurchaseStatus::OPEN, PurchaseStatus::Expired)
            .await?;
        if !won {
            tracing::debug!(purchase_id = %purchase.id, "Purchase settled before it could expire");
            return Ok(None);
        }

        let release = TicketTransition::Release {
            purchase_id: purchase.id,
        };
        let mut released = 0;
        for &number in &purchase.numbers {
            if self
                .store
                .try_transition(purchase.raffle_id, number, release)
                .await?
            {
                released += 1;
            }
        }

        tracing::info!(purchase_id = %purchase.id, released, "Purchase expired");
        Ok(Some(released))
    }

    /// Fix a ticket still `pending` past its hold. Returns whether it changed.
    async fn repair(&self, ticket: &Ticket) -> Result<bool, RaffleError> {
        let Some(owner) = ticket.purchase_id else {
            tracing::warn!(
                raffle_id = %ticket.raffle_id,
                number = ticket.number,
                "Pending ticket without owner cannot be released by a guarded write"
            );
            return Ok(false);
        };

        let transition = match self.store.get_purchase(owner).await? {
            None => TicketTransition::Release { purchase_id: owner },
            Some(purchase) => match purchase.status {
                PurchaseStatus::Expired | PurchaseStatus::Rejected => {
                    TicketTransition::Release { purchase_id: owner }
                }
                PurchaseStatus::Approved => TicketTransition::Sell { purchase_id: owner },
                // Still open: the purchase pass handles it, now or next sweep.
                PurchaseStatus::Initiated | PurchaseStatus::PendingPayment => return Ok(false),
            },
        };

        let changed = self
            .store
            .try_transition(ticket.raffle_id, ticket.number, transition)
            .await?;
        if changed {
            tracing::warn!(
                raffle_id = %ticket.raffle_id,
                number = ticket.number,
                purchase_id = %owner,
                ?transition,
                "Repaired orphaned ticket"
            );
        }
        Ok(changed)
    }
}
