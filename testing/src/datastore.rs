//! In-memory datastore.
//!
//! All four tables live behind a single `RwLock`, taken for the duration of
//! one trait call and never across an await. Each call is therefore one
//! atomic step, which is exactly what the guarded writes of the real
//! datastore promise, and nothing more: multi-call sequences interleave with
//! other tasks just as they would against Postgres.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use raffle_core::store::{
    PaymentRecordStore, PurchaseLedger, RaffleStore, StoreError, StoreFuture, TicketStore,
};
use raffle_core::types::{
    NotificationKind, PaymentRecord, Purchase, PurchaseId, PurchaseStatus, Raffle, RaffleId,
    RaffleStatus, RecordOutcome, Ticket, TicketCounts, TicketStatus, TicketTransition,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Tables {
    raffles: HashMap<RaffleId, Raffle>,
    tickets: BTreeMap<(RaffleId, u32), Ticket>,
    purchases: HashMap<PurchaseId, Purchase>,
    payments: HashMap<String, PaymentRecord>,
}

/// In-memory [`Datastore`](raffle_core::store::Datastore) for fast,
/// deterministic tests.
///
/// Clones share the same tables.
///
/// # Example
///
/// ```
/// use raffle_testing::InMemoryDatastore;
/// use raffle_core::store::TicketStore;
/// use raffle_core::types::RaffleId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryDatastore::new();
/// let tickets = store.list_tickets(RaffleId::new()).await?;
/// assert!(tickets.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDatastore {
    tables: Arc<RwLock<Tables>>,
    offline: Arc<AtomicBool>,
    broken_tickets: Arc<RwLock<HashSet<u32>>>,
}

fn ready<'a, T: Send + 'a>(result: Result<T, StoreError>) -> StoreFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

impl InMemoryDatastore {
    /// Create a new empty datastore
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Database` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make ticket transitions on `number` (in any raffle) fail with a
    /// datastore error.
    pub fn break_ticket(&self, number: u32) {
        self.broken_tickets.write().unwrap().insert(number);
    }

    /// Undo [`break_ticket`](Self::break_ticket) for every number.
    pub fn repair_tickets(&self) {
        self.broken_tickets.write().unwrap().clear();
    }

    /// Overwrite a ticket row directly, bypassing the guards.
    pub fn put_ticket(&self, ticket: Ticket) {
        self.tables
            .write()
            .unwrap()
            .tickets
            .insert((ticket.raffle_id, ticket.number), ticket);
    }

    /// Overwrite a purchase row directly, bypassing the guards.
    pub fn put_purchase(&self, purchase: Purchase) {
        self.tables
            .write()
            .unwrap()
            .purchases
            .insert(purchase.id, purchase);
    }

    /// Remove a purchase row directly.
    pub fn remove_purchase(&self, purchase_id: PurchaseId) {
        self.tables.write().unwrap().purchases.remove(&purchase_id);
    }

    /// Snapshot of one ticket.
    #[must_use]
    pub fn ticket(&self, raffle_id: RaffleId, number: u32) -> Option<Ticket> {
        self.tables
            .read()
            .unwrap()
            .tickets
            .get(&(raffle_id, number))
            .cloned()
    }

    /// Snapshot of one purchase.
    #[must_use]
    pub fn purchase(&self, purchase_id: PurchaseId) -> Option<Purchase> {
        self.tables
            .read()
            .unwrap()
            .purchases
            .get(&purchase_id)
            .cloned()
    }

    /// Snapshot of every purchase of a raffle.
    #[must_use]
    pub fn purchases_for(&self, raffle_id: RaffleId) -> Vec<Purchase> {
        self.tables
            .read()
            .unwrap()
            .purchases
            .values()
            .filter(|p| p.raffle_id == raffle_id)
            .cloned()
            .collect()
    }

    /// Snapshot of one payment record.
    #[must_use]
    pub fn payment_record(&self, external_id: &str) -> Option<PaymentRecord> {
        self.tables
            .read()
            .unwrap()
            .payments
            .get(external_id)
            .cloned()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Database("datastore offline".to_string()));
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        self.check_online()?;
        Ok(f(&self.tables.read().unwrap()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        self.check_online()?;
        Ok(f(&mut self.tables.write().unwrap()))
    }
}

impl RaffleStore for InMemoryDatastore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        ready(self.check_online())
    }

    fn create_raffle<'a>(&'a self, raffle: &'a Raffle) -> StoreFuture<'a, ()> {
        ready(self.write(|t| {
            if t.raffles.contains_key(&raffle.id) {
                return Err(StoreError::Duplicate(format!("raffle {}", raffle.id)));
            }
            t.raffles.insert(raffle.id, raffle.clone());
            for number in 1..=raffle.total_tickets {
                t.tickets
                    .insert((raffle.id, number), Ticket::available(raffle.id, number));
            }
            Ok(())
        })
        .and_then(|r| r))
    }

    fn get_raffle(&self, raffle_id: RaffleId) -> StoreFuture<'_, Option<Raffle>> {
        ready(self.read(|t| t.raffles.get(&raffle_id).cloned()))
    }

    fn update_raffle_status<'a>(
        &'a self,
        raffle_id: RaffleId,
        from: &'a [RaffleStatus],
        to: RaffleStatus,
    ) -> StoreFuture<'a, bool> {
        ready(self.write(|t| match t.raffles.get_mut(&raffle_id) {
            Some(raffle) if from.contains(&raffle.status) => {
                raffle.status = to;
                true
            }
            _ => false,
        }))
    }

    fn delete_unsold_raffle(&self, raffle_id: RaffleId) -> StoreFuture<'_, bool> {
        ready(self.write(|t| {
            let touched = t
                .tickets
                .range((raffle_id, 0)..=(raffle_id, u32::MAX))
                .any(|(_, ticket)| ticket.status != TicketStatus::Available);
            if touched || !t.raffles.contains_key(&raffle_id) {
                return false;
            }
            t.raffles.remove(&raffle_id);
            t.tickets.retain(|(r, _), _| *r != raffle_id);
            t.purchases.retain(|_, p| p.raffle_id != raffle_id);
            true
        }))
    }
}

impl TicketStore for InMemoryDatastore {
    fn list_tickets(&self, raffle_id: RaffleId) -> StoreFuture<'_, Vec<Ticket>> {
        ready(self.read(|t| {
            t.tickets
                .range((raffle_id, 0)..=(raffle_id, u32::MAX))
                .map(|(_, ticket)| ticket.clone())
                .collect()
        }))
    }

    fn get_tickets<'a>(
        &'a self,
        raffle_id: RaffleId,
        numbers: &'a [u32],
    ) -> StoreFuture<'a, Vec<Ticket>> {
        ready(self.read(|t| {
            let mut tickets: Vec<Ticket> = numbers
                .iter()
                .filter_map(|n| t.tickets.get(&(raffle_id, *n)).cloned())
                .collect();
            tickets.sort_by_key(|ticket| ticket.number);
            tickets.dedup_by_key(|ticket| ticket.number);
            tickets
        }))
    }

    fn try_transition(
        &self,
        raffle_id: RaffleId,
        number: u32,
        transition: TicketTransition,
    ) -> StoreFuture<'_, bool> {
        if self.broken_tickets.read().unwrap().contains(&number) {
            return ready(Err(StoreError::Database(format!(
                "injected failure on ticket {number}"
            ))));
        }
        ready(self.write(|t| {
            t.tickets
                .get_mut(&(raffle_id, number))
                .is_some_and(|ticket| transition.apply(ticket))
        }))
    }

    fn list_expired_holds(
        &self,
        cutoff: DateTime<Utc>,
        raffle_id: Option<RaffleId>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        ready(self.read(|t| {
            t.tickets
                .values()
                .filter(|ticket| ticket.status == TicketStatus::Pending)
                .filter(|ticket| raffle_id.is_none_or(|r| ticket.raffle_id == r))
                .filter(|ticket| ticket.hold_expires_at.is_some_and(|h| h < cutoff))
                .take(limit as usize)
                .cloned()
                .collect()
        }))
    }

    fn ticket_counts(&self, raffle_id: RaffleId) -> StoreFuture<'_, TicketCounts> {
        ready(self.read(|t| {
            let mut counts = TicketCounts::default();
            for (_, ticket) in t.tickets.range((raffle_id, 0)..=(raffle_id, u32::MAX)) {
                match ticket.status {
                    TicketStatus::Available => counts.available += 1,
                    TicketStatus::Pending => counts.pending += 1,
                    TicketStatus::Sold => counts.sold += 1,
                }
            }
            counts
        }))
    }
}

impl PurchaseLedger for InMemoryDatastore {
    fn insert_purchase<'a>(&'a self, purchase: &'a Purchase) -> StoreFuture<'a, ()> {
        ready(
            self.write(|t| {
                if t.purchases.contains_key(&purchase.id) {
                    return Err(StoreError::Duplicate(format!("purchase {}", purchase.id)));
                }
                t.purchases.insert(purchase.id, purchase.clone());
                Ok(())
            })
            .and_then(|r| r),
        )
    }

    fn get_purchase(&self, purchase_id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        ready(self.read(|t| t.purchases.get(&purchase_id).cloned()))
    }

    fn find_purchase_by_preference<'a>(
        &'a self,
        preference_id: &'a str,
    ) -> StoreFuture<'a, Option<Purchase>> {
        ready(self.read(|t| {
            t.purchases
                .values()
                .find(|p| p.preference_id.as_deref() == Some(preference_id))
                .cloned()
        }))
    }

    fn transition_purchase<'a>(
        &'a self,
        purchase_id: PurchaseId,
        from: &'a [PurchaseStatus],
        to: PurchaseStatus,
    ) -> StoreFuture<'a, bool> {
        ready(self.write(|t| match t.purchases.get_mut(&purchase_id) {
            Some(purchase) if from.contains(&purchase.status) => {
                purchase.status = to;
                purchase.updated_at = Utc::now();
                true
            }
            _ => false,
        }))
    }

    fn attach_preference<'a>(
        &'a self,
        purchase_id: PurchaseId,
        preference_id: &'a str,
    ) -> StoreFuture<'a, bool> {
        ready(self.write(|t| match t.purchases.get_mut(&purchase_id) {
            Some(purchase) if purchase.status == PurchaseStatus::Initiated => {
                purchase.status = PurchaseStatus::PendingPayment;
                purchase.preference_id = Some(preference_id.to_string());
                purchase.updated_at = Utc::now();
                true
            }
            _ => false,
        }))
    }

    fn set_payment_id<'a>(
        &'a self,
        purchase_id: PurchaseId,
        payment_id: &'a str,
    ) -> StoreFuture<'a, ()> {
        ready(self.write(|t| {
            if let Some(purchase) = t.purchases.get_mut(&purchase_id) {
                purchase.payment_id = Some(payment_id.to_string());
            }
        }))
    }

    fn list_expired_purchases(
        &self,
        cutoff: DateTime<Utc>,
        raffle_id: Option<RaffleId>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Purchase>> {
        ready(self.read(|t| {
            let mut purchases: Vec<Purchase> = t
                .purchases
                .values()
                .filter(|p| PurchaseStatus::OPEN.contains(&p.status))
                .filter(|p| raffle_id.is_none_or(|r| p.raffle_id == r))
                .filter(|p| p.hold_expires_at < cutoff)
                .cloned()
                .collect();
            purchases.sort_by_key(|p| p.hold_expires_at);
            purchases.truncate(limit as usize);
            purchases
        }))
    }

    fn claim_notification(
        &self,
        purchase_id: PurchaseId,
        kind: NotificationKind,
    ) -> StoreFuture<'_, bool> {
        ready(self.write(|t| {
            let Some(purchase) = t.purchases.get_mut(&purchase_id) else {
                return false;
            };
            let marker = match kind {
                NotificationKind::Buyer => &mut purchase.emailed_buyer,
                NotificationKind::Creator => &mut purchase.emailed_creator,
            };
            if *marker {
                return false;
            }
            *marker = true;
            true
        }))
    }

    fn release_notification(
        &self,
        purchase_id: PurchaseId,
        kind: NotificationKind,
    ) -> StoreFuture<'_, ()> {
        ready(self.write(|t| {
            if let Some(purchase) = t.purchases.get_mut(&purchase_id) {
                match kind {
                    NotificationKind::Buyer => purchase.emailed_buyer = false,
                    NotificationKind::Creator => purchase.emailed_creator = false,
                }
            }
        }))
    }
}

impl PaymentRecordStore for InMemoryDatastore {
    fn upsert_payment_record<'a>(
        &'a self,
        record: &'a PaymentRecord,
    ) -> StoreFuture<'a, RecordOutcome> {
        ready(self.write(|t| match t.payments.get_mut(&record.external_id) {
            None => {
                t.payments.insert(record.external_id.clone(), record.clone());
                RecordOutcome::Inserted
            }
            Some(existing) if existing.status.is_terminal() => {
                RecordOutcome::AlreadyTerminal(existing.status)
            }
            Some(existing) => {
                existing.status = record.status;
                existing.amount = record.amount.or(existing.amount);
                existing.purchase_id = record.purchase_id.or(existing.purchase_id);
                existing.attempts += 1;
                existing.updated_at = record.updated_at;
                RecordOutcome::Updated
            }
        }))
    }

    fn get_payment_record<'a>(
        &'a self,
        external_id: &'a str,
    ) -> StoreFuture<'a, Option<PaymentRecord>> {
        ready(self.read(|t| t.payments.get(external_id).cloned()))
    }

    fn list_unresolved_payments(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
        limit: u32,
    ) -> StoreFuture<'_, Vec<PaymentRecord>> {
        ready(self.read(|t| {
            let mut records: Vec<PaymentRecord> = t
                .payments
                .values()
                .filter(|r| !r.status.is_terminal())
                .filter(|r| r.updated_at < older_than && r.attempts < max_attempts)
                .cloned()
                .collect();
            records.sort_by_key(|r| r.updated_at);
            records.truncate(limit as usize);
            records
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use chrono::Duration;
    use raffle_core::gateway::GatewayPaymentStatus;
    use raffle_core::types::Money;

    fn raffle(total: u32) -> Raffle {
        let now = Utc::now();
        Raffle {
            id: RaffleId::new(),
            title: "Test".to_string(),
            unit_price: Money::from_cents(100),
            total_tickets: total,
            status: RaffleStatus::Active,
            ends_at: now + Duration::days(1),
            creator_email: "creator@example.com".to_string(),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_raffle_creates_tickets() {
        let store = InMemoryDatastore::new();
        let raffle = raffle(5);
        store.create_raffle(&raffle).await.expect("create");

        let counts = store.ticket_counts(raffle.id).await.expect("counts");
        assert_eq!(counts, TicketCounts { available: 5, pending: 0, sold: 0 });
        assert!(store.create_raffle(&raffle).await.is_err());
    }

    #[tokio::test]
    async fn test_terminal_payment_record_is_sticky() {
        let store = InMemoryDatastore::new();
        let now = Utc::now();
        let approved = PaymentRecord::new("p1", GatewayPaymentStatus::Approved, None, None, now);
        let pending = PaymentRecord::new("p1", GatewayPaymentStatus::Pending, None, None, now);

        assert_eq!(store.upsert_payment_record(&approved).await.expect("upsert"), RecordOutcome::Inserted);
        assert_eq!(
            store.upsert_payment_record(&pending).await.expect("upsert"),
            RecordOutcome::AlreadyTerminal(GatewayPaymentStatus::Approved)
        );
        assert_eq!(store.payment_record("p1").expect("record").status, GatewayPaymentStatus::Approved);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemoryDatastore::new();
        store.set_offline(true);
        assert!(store.ping().await.is_err());
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
