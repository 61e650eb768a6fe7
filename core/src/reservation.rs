//! Ticket reservation.
//!
//! A reservation claims every requested ticket for a new purchase, then opens
//! a hosted payment preference for it. Claims go through
//! [`TicketStore::try_transition`] one ticket at a time, in ascending number
//! order, so two overlapping requests always collide on their lowest shared
//! number and exactly one of them wins it.
//!
//! Any failure after the purchase row exists (a lost claim, a datastore
//! error, a gateway error) rolls back: the tickets claimed so far are
//! released and the purchase is moved to `expired`. No ticket is left
//! `pending` without a purchase that can still be paid.
//!
//! [`TicketStore::try_transition`]: crate::store::TicketStore::try_transition

use crate::config::ReservationConfig;
use crate::environment::Clock;
use crate::error::RaffleError;
use crate::gateway::{PaymentGateway, PreferenceRequest};
use crate::store::Datastore;
use crate::types::{
    Money, Purchase, PurchaseId, PurchaseStatus, Raffle, RaffleId, TicketStatus,
    TicketTransition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Checkout request from a buyer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRequest {
    /// Raffle to buy from
    pub raffle_id: RaffleId,
    /// Ticket numbers to hold
    pub numbers: Vec<u32>,
    /// Buyer contact
    pub buyer_email: String,
}

/// A successful reservation, ready for payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Created purchase
    pub purchase_id: PurchaseId,
    /// Held numbers, ascending
    pub numbers: Vec<u32>,
    /// Amount to pay
    pub amount: Money,
    /// Gateway preference id
    pub preference_id: String,
    /// Hosted checkout URL for the buyer
    pub redirect_url: String,
    /// The tickets are released after this instant unless paid
    pub hold_expires_at: DateTime<Utc>,
}

/// Holds tickets and opens the payment for them.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn Datastore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl ReservationManager {
    /// Create a reservation manager.
    #[must_use]
    pub fn new(
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
        }
    }

    /// Reserve `numbers` of a raffle for a buyer.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty/duplicate/out-of-range numbers, bad email, raffle
    ///   not on sale
    /// - `RaffleNotFound`: unknown raffle
    /// - `TicketsUnavailable`: a requested ticket is held or sold
    /// - `Gateway`: the preference could not be created
    /// - `ReservationExpired`: the hold was swept before checkout finished
    /// - `Fatal`: datastore failure
    ///
    /// Every error after the purchase row was written leaves the tickets
    /// released and the purchase `expired`.
    #[tracing::instrument(skip_all, fields(raffle_id = %request.raffle_id))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation, RaffleError> {
        let result = self.try_reserve(request).await;
        let outcome = match &result {
            Ok(_) => "reserved",
            Err(e) => e.code(),
        };
        metrics::counter!("raffle_reservations_total", "outcome" => outcome).increment(1);
        result
    }

    async fn try_reserve(&self, request: ReserveRequest) -> Result<Reservation, RaffleError> {
        let ReserveRequest {
            raffle_id,
            numbers,
            buyer_email,
        } = request;

        self.validate_shape(&numbers, &buyer_email)?;

        let raffle = self
            .store
            .get_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;

        let now = self.clock.now();
        validate_against_raffle(&raffle, &numbers, now)?;

        let quantity = u32::try_from(numbers.len())
            .map_err(|_| RaffleError::Validation("too many numbers".to_string()))?;
        let amount = raffle
            .unit_price
            .checked_multiply(quantity)
            .ok_or_else(|| RaffleError::Validation("amount overflows".to_string()))?;

        let hold_expires_at = now + self.config.hold_duration;
        let purchase = Purchase::new(
            raffle.id,
            numbers,
            buyer_email.trim().to_string(),
            amount,
            hold_expires_at,
            now,
        );
        self.store.insert_purchase(&purchase).await?;

        tracing::debug!(purchase_id = %purchase.id, numbers = ?purchase.numbers, "Purchase created");

        let claimed = self.claim_tickets(&purchase).await?;

        let preference_request = PreferenceRequest {
            purchase_id: purchase.id,
            raffle_id: raffle.id,
            title: raffle.title.clone(),
            quantity,
            unit_price: raffle.unit_price,
            currency: self.config.currency.clone(),
            payer_email: purchase.buyer_email.clone(),
            urls: self.config.urls.for_purchase(purchase.id),
            expires_at: hold_expires_at,
        };

        let preference = match self.gateway.create_preference(preference_request).await {
            Ok(preference) => preference,
            Err(e) => {
                tracing::warn!(purchase_id = %purchase.id, error = %e, "Preference creation failed, rolling back");
                self.rollback(&purchase, &claimed).await;
                return Err(RaffleError::Gateway(e));
            }
        };

        match self
            .store
            .attach_preference(purchase.id, &preference.preference_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(purchase_id = %purchase.id, "Purchase left initiated before checkout finished");
                self.rollback(&purchase, &claimed).await;
                return Err(RaffleError::ReservationExpired(purchase.id));
            }
            Err(e) => {
                self.rollback(&purchase, &claimed).await;
                return Err(e.into());
            }
        }

        tracing::info!(
            purchase_id = %purchase.id,
            preference_id = %preference.preference_id,
            quantity,
            "Tickets reserved"
        );

        Ok(Reservation {
            purchase_id: purchase.id,
            numbers: purchase.numbers,
            amount,
            preference_id: preference.preference_id,
            redirect_url: preference.redirect_url,
            hold_expires_at,
        })
    }

    fn validate_shape(&self, numbers: &[u32], buyer_email: &str) -> Result<(), RaffleError> {
        if numbers.is_empty() {
            return Err(RaffleError::Validation("numbers must not be empty".to_string()));
        }
        if numbers.len() > self.config.max_numbers_per_purchase {
            return Err(RaffleError::Validation(format!(
                "at most {} numbers per purchase",
                self.config.max_numbers_per_purchase
            )));
        }
        let mut seen = HashSet::with_capacity(numbers.len());
        if let Some(dup) = numbers.iter().find(|n| !seen.insert(**n)) {
            return Err(RaffleError::Validation(format!("number {dup} requested twice")));
        }
        if !is_plausible_email(buyer_email) {
            return Err(RaffleError::Validation("buyer email is invalid".to_string()));
        }
        Ok(())
    }

    /// Hold every ticket of the purchase, lowest number first.
    ///
    /// On any failure the claimed tickets are released, the purchase is
    /// expired, and the error is returned.
    async fn claim_tickets(&self, purchase: &Purchase) -> Result<Vec<u32>, RaffleError> {
        let hold = TicketTransition::Hold {
            purchase_id: purchase.id,
            hold_expires_at: purchase.hold_expires_at,
        };
        let mut claimed = Vec::with_capacity(purchase.numbers.len());

        for &number in &purchase.numbers {
            match self
                .store
                .try_transition(purchase.raffle_id, number, hold)
                .await
            {
                Ok(true) => claimed.push(number),
                Ok(false) => {
                    self.rollback(purchase, &claimed).await;
                    let numbers = self.unavailable_numbers(purchase, number).await;
                    tracing::info!(purchase_id = %purchase.id, ?numbers, "Tickets not available");
                    return Err(RaffleError::TicketsUnavailable { numbers });
                }
                Err(e) => {
                    tracing::error!(purchase_id = %purchase.id, number, error = %e, "Ticket claim failed");
                    self.rollback(purchase, &claimed).await;
                    return Err(e.into());
                }
            }
        }

        Ok(claimed)
    }

    /// Requested numbers not free after rollback. Always includes the number
    /// whose claim was lost.
    async fn unavailable_numbers(&self, purchase: &Purchase, lost: u32) -> Vec<u32> {
        let mut numbers: Vec<u32> = match self
            .store
            .get_tickets(purchase.raffle_id, &purchase.numbers)
            .await
        {
            Ok(tickets) => tickets
                .into_iter()
                .filter(|t| t.status != TicketStatus::Available)
                .map(|t| t.number)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not re-read tickets after lost claim");
                Vec::new()
            }
        };
        if !numbers.contains(&lost) {
            numbers.push(lost);
            numbers.sort_unstable();
        }
        numbers
    }

    /// Best-effort undo. Every step is guarded, so a rollback racing the
    /// sweeper or a repeated rollback is harmless.
    async fn rollback(&self, purchase: &Purchase, claimed: &[u32]) {
        let release = TicketTransition::Release {
            purchase_id: purchase.id,
        };
        for &number in claimed {
            if let Err(e) = self
                .store
                .try_transition(purchase.raffle_id, number, release)
                .await
            {
                tracing::error!(
                    purchase_id = %purchase.id,
                    number,
                    error = %e,
                    "Rollback could not release ticket; sweeper will repair it"
                );
            }
        }

        if let Err(e) = self
            .store
            .transition_purchase(purchase.id, &PurchaseStatus::OPEN, PurchaseStatus::Expired)
            .await
        {
            tracing::error!(purchase_id = %purchase.id, error = %e, "Rollback could not expire purchase");
        }
    }
}

fn validate_against_raffle(
    raffle: &Raffle,
    numbers: &[u32],
    now: DateTime<Utc>,
) -> Result<(), RaffleError> {
    if !raffle.is_open_for_sale(now) {
        return Err(RaffleError::Validation(format!(
            "raffle is not on sale (status {})",
            raffle.status.as_str()
        )));
    }
    if let Some(bad) = numbers.iter().find(|n| !raffle.contains_number(**n)) {
        return Err(RaffleError::Validation(format!(
            "number {bad} is outside 1..={}",
            raffle.total_tickets
        )));
    }
    Ok(())
}

/// Cheap shape check; the gateway and email provider do the real validation.
pub(crate) fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(is_plausible_email("buyer@example.com"));
        assert!(is_plausible_email("  buyer@example.com "));
        assert!(!is_plausible_email("buyer"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("buyer@localhost"));
        assert!(!is_plausible_email("bu yer@example.com"));
    }
}
