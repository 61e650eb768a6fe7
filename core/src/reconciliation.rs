//! Payment reconciliation.
//!
//! Turns a gateway payment into at most one terminal purchase transition.
//! The engine is called redundantly and out of order (webhook retries,
//! buyer redirects, admin triggers, the stale-payment pass, the sweeper), so
//! every step is a guarded write:
//!
//! 1. the payment is fetched from the gateway (the webhook body is never
//!    trusted for status);
//! 2. the purchase is resolved from the payment metadata, falling back to the
//!    external reference and then to the stored preference id;
//! 3. the payment record is upserted by external id; a stored terminal status
//!    means the outcome was already applied;
//! 4. the purchase moves `initiated|pending_payment → approved|rejected` with
//!    a compare-and-set, and only the winner's view decides what happens to
//!    the tickets, each of which is sold or released only while still held
//!    by this purchase;
//! 5. approval emails go out through the claim-gated dispatcher.
//!
//! Duplicate, unknown and late notifications are [`ReconcileOutcome::Skipped`],
//! never errors. Gateway failures are errors the caller may retry.

use crate::environment::Clock;
use crate::error::RaffleError;
use crate::gateway::{GatewayPaymentStatus, PaymentDetails, PaymentGateway, Resolution};
use crate::notification::NotificationDispatcher;
use crate::store::Datastore;
use crate::types::{
    PaymentRecord, Purchase, PurchaseId, PurchaseStatus, RecordOutcome, TicketStatus,
    TicketTransition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stale payment records are polled at most this many times.
pub const MAX_STALE_ATTEMPTS: u32 = 20;

/// Why a reconciliation made no change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The payment has not settled yet
    NotTerminal {
        /// Current gateway status
        status: GatewayPaymentStatus,
    },
    /// Settled, but not in a way that moves tickets (refund, chargeback)
    NotActionable {
        /// Current gateway status
        status: GatewayPaymentStatus,
    },
    /// No purchase matches the payment
    PurchaseNotFound,
    /// The purchase already ended differently (late approval, rejection after
    /// approval)
    TerminalPurchase {
        /// Purchase concerned
        purchase_id: PurchaseId,
        /// Its final status
        status: PurchaseStatus,
    },
    /// The gateway has no payment for the purchase yet
    NoPayment,
}

/// Result of one reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// This call moved the purchase to its terminal status
    Applied {
        /// Purchase concerned
        purchase_id: PurchaseId,
        /// Status applied
        resolution: Resolution,
    },
    /// Another call already applied the same outcome
    AlreadyApplied {
        /// Purchase concerned
        purchase_id: PurchaseId,
    },
    /// Nothing to do
    Skipped(SkipReason),
}

impl ReconcileOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::AlreadyApplied { .. } => "already_applied",
            Self::Skipped(SkipReason::NotTerminal { .. }) => "not_terminal",
            Self::Skipped(SkipReason::NotActionable { .. }) => "not_actionable",
            Self::Skipped(SkipReason::PurchaseNotFound) => "purchase_not_found",
            Self::Skipped(SkipReason::TerminalPurchase { .. }) => "terminal_purchase",
            Self::Skipped(SkipReason::NoPayment) => "no_payment",
        }
    }
}

/// Summary of a stale-payment pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleReport {
    /// Records examined
    pub attempted: u32,
    /// Records whose outcome was applied by this pass
    pub applied: u32,
    /// Records that needed no change
    pub skipped: u32,
    /// Records that failed again
    pub failed: u32,
}

/// Applies gateway payment outcomes to purchases and tickets.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn Datastore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationDispatcher,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifications,
            clock,
        }
    }

    /// Fetch a payment from the gateway and apply it.
    ///
    /// # Errors
    ///
    /// - `Gateway`: the payment could not be fetched; retry later
    /// - `Fatal`: datastore failure
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_payment(&self, external_id: &str) -> Result<ReconcileOutcome, RaffleError> {
        let payment = self.gateway.get_payment(external_id).await?;
        self.apply_payment(payment).await
    }

    /// Reconcile a purchase by its stored payment id, or by searching the
    /// gateway for payments made against it.
    ///
    /// # Errors
    ///
    /// - `PurchaseNotFound`: unknown purchase
    /// - `Gateway`: the gateway could not be queried
    /// - `Fatal`: datastore failure
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_purchase(&self, purchase_id: PurchaseId) -> Result<ReconcileOutcome, RaffleError> {
        let purchase = self
            .store
            .get_purchase(purchase_id)
            .await?
            .ok_or(RaffleError::PurchaseNotFound(purchase_id))?;

        if let Some(payment_id) = purchase.payment_id.as_deref() {
            return self.reconcile_payment(payment_id).await;
        }

        let reference = purchase_id.to_string();
        match self.gateway.find_payment_by_reference(&reference).await? {
            Some(payment) => self.apply_payment(payment).await,
            None => {
                tracing::debug!("No payment at gateway yet");
                Ok(finish(ReconcileOutcome::Skipped(SkipReason::NoPayment)))
            }
        }
    }

    /// Durably note a payment notification whose processing failed, so the
    /// stale-payment pass picks it up.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` if the record cannot be written.
    pub async fn record_deferred(&self, external_id: &str) -> Result<(), RaffleError> {
        let existing = self.store.get_payment_record(external_id).await?;
        let (status, amount, purchase_id) = existing.map_or(
            (GatewayPaymentStatus::Unknown, None, None),
            |r| (r.status, r.amount, r.purchase_id),
        );
        let record = PaymentRecord::new(external_id, status, amount, purchase_id, self.clock.now());
        self.store.upsert_payment_record(&record).await?;
        tracing::info!(external_id, "Payment notification deferred");
        Ok(())
    }

    /// Re-run reconciliation for payment records that have not reached a
    /// terminal status and were last touched before `older_than`.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` if the records cannot be listed. Per-record failures
    /// are counted, not returned.
    pub async fn reconcile_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<StaleReport, RaffleError> {
        let records = self
            .store
            .list_unresolved_payments(older_than, MAX_STALE_ATTEMPTS, limit)
            .await?;

        let mut report = StaleReport::default();
        for record in records {
            report.attempted += 1;
            match self.reconcile_payment(&record.external_id).await {
                Ok(ReconcileOutcome::Applied { .. }) => report.applied += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(external_id = %record.external_id, error = %e, "Stale payment still failing");
                    // Bumps attempts so a permanently failing id is eventually dropped.
                    if let Err(e) = self.record_deferred(&record.external_id).await {
                        tracing::error!(external_id = %record.external_id, error = %e, "Could not bump payment record");
                    }
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(?report, "Stale payments reconciled");
        }
        Ok(report)
    }

    /// Apply already-fetched payment details.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` on datastore failure.
    #[tracing::instrument(skip_all, fields(external_id = %payment.external_id, status = payment.status.as_str()))]
    pub async fn apply_payment(&self, payment: PaymentDetails) -> Result<ReconcileOutcome, RaffleError> {
        let now = self.clock.now();

        let Some(purchase) = self.resolve_purchase(&payment).await? else {
            let record = PaymentRecord::new(&payment.external_id, payment.status, payment.amount, None, now);
            self.store.upsert_payment_record(&record).await?;
            tracing::warn!("Payment does not match any purchase");
            return Ok(finish(ReconcileOutcome::Skipped(SkipReason::PurchaseNotFound)));
        };

        if !purchase.status.is_terminal() && purchase.payment_id.as_deref() != Some(payment.external_id.as_str()) {
            self.store.set_payment_id(purchase.id, &payment.external_id).await?;
        }

        let record = PaymentRecord::new(
            &payment.external_id,
            payment.status,
            payment.amount,
            Some(purchase.id),
            now,
        );
        let stored = self.store.upsert_payment_record(&record).await?;

        let resolution = match stored {
            RecordOutcome::AlreadyTerminal(previous) => {
                if purchase.status.is_terminal() {
                    if purchase.status == PurchaseStatus::Approved {
                        self.notify_approved(&purchase).await;
                    }
                    tracing::debug!(previous = previous.as_str(), "Payment already applied");
                    return Ok(finish(ReconcileOutcome::AlreadyApplied { purchase_id: purchase.id }));
                }
                // Recorded as settled but the purchase never moved: finish the job.
                match previous.resolution() {
                    Some(resolution) => resolution,
                    None => {
                        return Ok(finish(ReconcileOutcome::Skipped(SkipReason::NotActionable {
                            status: previous,
                        })));
                    }
                }
            }
            RecordOutcome::Inserted | RecordOutcome::Updated => match payment.status.resolution() {
                Some(resolution) => resolution,
                None if payment.status.is_terminal() => {
                    return Ok(finish(ReconcileOutcome::Skipped(SkipReason::NotActionable {
                        status: payment.status,
                    })));
                }
                None => {
                    return Ok(finish(ReconcileOutcome::Skipped(SkipReason::NotTerminal {
                        status: payment.status,
                    })));
                }
            },
        };

        let outcome = match resolution {
            Resolution::Approved => self.approve(purchase).await?,
            Resolution::Rejected => self.reject(purchase).await?,
        };
        Ok(finish(outcome))
    }

    async fn resolve_purchase(&self, payment: &PaymentDetails) -> Result<Option<Purchase>, RaffleError> {
        if let Some(purchase_id) = payment.metadata.purchase_id {
            if let Some(purchase) = self.store.get_purchase(purchase_id).await? {
                return Ok(Some(purchase));
            }
        }

        if let Some(purchase_id) = payment
            .external_reference
            .as_deref()
            .and_then(|r| r.parse::<PurchaseId>().ok())
        {
            if let Some(purchase) = self.store.get_purchase(purchase_id).await? {
                return Ok(Some(purchase));
            }
        }

        if let Some(preference_id) = payment.preference_id.as_deref() {
            return Ok(self.store.find_purchase_by_preference(preference_id).await?);
        }

        Ok(None)
    }

    async fn approve(&self, purchase: Purchase) -> Result<ReconcileOutcome, RaffleError> {
        let won = self
            .store
            .transition_purchase(purchase.id, &PurchaseStatus::OPEN, PurchaseStatus::Approved)
            .await?;

        let current = if won {
            Purchase {
                status: PurchaseStatus::Approved,
                ..purchase
            }
        } else {
            let Some(current) = self.store.get_purchase(purchase.id).await? else {
                return Ok(ReconcileOutcome::Skipped(SkipReason::PurchaseNotFound));
            };
            if current.status != PurchaseStatus::Approved {
                metrics::counter!("raffle_late_approvals_total").increment(1);
                tracing::warn!(
                    purchase_id = %current.id,
                    status = current.status.as_str(),
                    "Approved payment for a purchase that already ended; needs manual refund"
                );
                return Ok(ReconcileOutcome::Skipped(SkipReason::TerminalPurchase {
                    purchase_id: current.id,
                    status: current.status,
                }));
            }
            current
        };

        self.move_tickets(&current, TicketTransition::Sell { purchase_id: current.id }, TicketStatus::Sold)
            .await?;
        self.notify_approved(&current).await;

        if won {
            tracing::info!(purchase_id = %current.id, "Purchase approved");
            Ok(ReconcileOutcome::Applied {
                purchase_id: current.id,
                resolution: Resolution::Approved,
            })
        } else {
            Ok(ReconcileOutcome::AlreadyApplied { purchase_id: current.id })
        }
    }

    async fn reject(&self, purchase: Purchase) -> Result<ReconcileOutcome, RaffleError> {
        let won = self
            .store
            .transition_purchase(purchase.id, &PurchaseStatus::OPEN, PurchaseStatus::Rejected)
            .await?;

        let release = TicketTransition::Release { purchase_id: purchase.id };

        if won {
            self.move_tickets(&purchase, release, TicketStatus::Available).await?;
            tracing::info!(purchase_id = %purchase.id, "Purchase rejected, tickets released");
            return Ok(ReconcileOutcome::Applied {
                purchase_id: purchase.id,
                resolution: Resolution::Rejected,
            });
        }

        let Some(current) = self.store.get_purchase(purchase.id).await? else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::PurchaseNotFound));
        };
        if current.status == PurchaseStatus::Rejected {
            self.move_tickets(&current, release, TicketStatus::Available).await?;
            return Ok(ReconcileOutcome::AlreadyApplied { purchase_id: current.id });
        }

        tracing::info!(
            purchase_id = %current.id,
            status = current.status.as_str(),
            "Rejected payment for a purchase that already ended"
        );
        Ok(ReconcileOutcome::Skipped(SkipReason::TerminalPurchase {
            purchase_id: current.id,
            status: current.status,
        }))
    }

    /// Apply a guarded transition to each of the purchase's tickets. Tickets
    /// no longer held by the purchase are left alone.
    async fn move_tickets(
        &self,
        purchase: &Purchase,
        transition: TicketTransition,
        target: TicketStatus,
    ) -> Result<usize, RaffleError> {
        let mut moved = 0;
        for &number in &purchase.numbers {
            if self
                .store
                .try_transition(purchase.raffle_id, number, transition)
                .await?
            {
                moved += 1;
            }
        }

        if moved < purchase.numbers.len() {
            let tickets = self.store.get_tickets(purchase.raffle_id, &purchase.numbers).await?;
            for ticket in tickets {
                let settled = ticket.status == target
                    && (target == TicketStatus::Available || ticket.purchase_id == Some(purchase.id));
                if !settled {
                    tracing::warn!(
                        purchase_id = %purchase.id,
                        number = ticket.number,
                        status = ticket.status.as_str(),
                        "Ticket not held by purchase, left unchanged"
                    );
                }
            }
        }

        Ok(moved)
    }

    async fn notify_approved(&self, purchase: &Purchase) {
        match self.store.get_raffle(purchase.raffle_id).await {
            Ok(Some(raffle)) => {
                self.notifications.dispatch_approved(purchase, &raffle).await;
            }
            Ok(None) => {
                tracing::warn!(raffle_id = %purchase.raffle_id, "Raffle missing, notifications skipped");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load raffle, notifications skipped");
            }
        }
    }

}

fn finish(outcome: ReconcileOutcome) -> ReconcileOutcome {
    metrics::counter!("raffle_reconciliations_total", "outcome" => outcome.label()).increment(1);
    tracing::debug!(outcome = outcome.label(), "Reconciliation finished");
    outcome
}
