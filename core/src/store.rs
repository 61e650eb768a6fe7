//! Storage traits for raffles, tickets, purchases and payment records.
//!
//! The four logical tables are shared, mutably, by every component and by
//! every running instance of the service. The only mutation discipline the
//! traits offer is a guarded write scoped to one row:
//!
//! - tickets change through [`TicketStore::try_transition`], a compare-and-set
//!   on the ticket's status and owning purchase;
//! - purchases change through [`PurchaseLedger::transition_purchase`] and the
//!   other conditional methods, each keyed on the expected current status;
//! - payment records are upserted by external id, and a terminal stored
//!   status is never overwritten.
//!
//! Guarded writes return `Ok(false)` when the row was not in the expected
//! state. That is not an error: callers treat it as "someone else got there
//! first" and carry on without forcing the write.
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the traits
//! can be used as `Arc<dyn Datastore>`.
//!
//! # Implementations
//!
//! - `PgDatastore` (in `raffle-postgres`): production
//! - `InMemoryDatastore` (in `raffle-testing`): fast, deterministic tests

use crate::types::{
    NotificationKind, PaymentRecord, Purchase, PurchaseId, PurchaseStatus, Raffle, RaffleId,
    RaffleStatus, RecordOutcome, Ticket, TicketCounts, TicketTransition,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by the storage traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A unique key already exists.
    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

/// Raffle table.
pub trait RaffleStore: Send + Sync {
    /// Check the datastore is reachable.
    ///
    /// # Errors
    ///
    /// Returns error if the datastore cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Insert a raffle and bulk-create its tickets `1..=total_tickets` as
    /// `available`.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: a raffle with this id exists
    /// - `Database`: the write failed
    fn create_raffle<'a>(&'a self, raffle: &'a Raffle) -> StoreFuture<'a, ()>;

    /// Load a raffle.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn get_raffle(&self, raffle_id: RaffleId) -> StoreFuture<'_, Option<Raffle>>;

    /// Set the raffle status to `to` if it is currently one of `from`.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn update_raffle_status<'a>(
        &'a self,
        raffle_id: RaffleId,
        from: &'a [RaffleStatus],
        to: RaffleStatus,
    ) -> StoreFuture<'a, bool>;

    /// Physically delete a raffle, its tickets and its ended purchases when
    /// no ticket is `pending` or `sold`. Returns `false` otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn delete_unsold_raffle(&self, raffle_id: RaffleId) -> StoreFuture<'_, bool>;
}

/// Ticket table.
pub trait TicketStore: Send + Sync {
    /// All tickets of a raffle, ordered by number.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_tickets(&self, raffle_id: RaffleId) -> StoreFuture<'_, Vec<Ticket>>;

    /// The tickets with the given numbers, ordered by number. Unknown numbers
    /// are omitted.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn get_tickets<'a>(&'a self, raffle_id: RaffleId, numbers: &'a [u32])
    -> StoreFuture<'a, Vec<Ticket>>;

    /// Apply a guarded transition to one ticket.
    ///
    /// Returns `true` only if the ticket was in the transition's expected
    /// pre-state and was updated in the same atomic step.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn try_transition(
        &self,
        raffle_id: RaffleId,
        number: u32,
        transition: TicketTransition,
    ) -> StoreFuture<'_, bool>;

    /// `pending` tickets whose hold ended before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_expired_holds(
        &self,
        cutoff: DateTime<Utc>,
        raffle_id: Option<RaffleId>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Ticket counts per status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn ticket_counts(&self, raffle_id: RaffleId) -> StoreFuture<'_, TicketCounts>;
}

/// Purchase table.
pub trait PurchaseLedger: Send + Sync {
    /// Insert a new purchase.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: a purchase with this id exists
    /// - `Database`: the write failed
    fn insert_purchase<'a>(&'a self, purchase: &'a Purchase) -> StoreFuture<'a, ()>;

    /// Load a purchase.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn get_purchase(&self, purchase_id: PurchaseId) -> StoreFuture<'_, Option<Purchase>>;

    /// Find the purchase a gateway preference was created for.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_purchase_by_preference<'a>(
        &'a self,
        preference_id: &'a str,
    ) -> StoreFuture<'a, Option<Purchase>>;

    /// Set the purchase status to `to` if it is currently one of `from`.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn transition_purchase<'a>(
        &'a self,
        purchase_id: PurchaseId,
        from: &'a [PurchaseStatus],
        to: PurchaseStatus,
    ) -> StoreFuture<'a, bool>;

    /// Store the preference id and move `initiated → pending_payment`.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn attach_preference<'a>(
        &'a self,
        purchase_id: PurchaseId,
        preference_id: &'a str,
    ) -> StoreFuture<'a, bool>;

    /// Store the gateway payment id once known.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn set_payment_id<'a>(&'a self, purchase_id: PurchaseId, payment_id: &'a str)
    -> StoreFuture<'a, ()>;

    /// Open (`initiated`/`pending_payment`) purchases whose hold ended before
    /// `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_expired_purchases(
        &self,
        cutoff: DateTime<Utc>,
        raffle_id: Option<RaffleId>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Purchase>>;

    /// Set a notification marker if it is unset. Returns `true` for the
    /// single caller that flipped it.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn claim_notification(
        &self,
        purchase_id: PurchaseId,
        kind: NotificationKind,
    ) -> StoreFuture<'_, bool>;

    /// Clear a marker after the claimed send failed.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn release_notification(
        &self,
        purchase_id: PurchaseId,
        kind: NotificationKind,
    ) -> StoreFuture<'_, ()>;
}

/// Payment record table.
pub trait PaymentRecordStore: Send + Sync {
    /// Upsert a record keyed by external id.
    ///
    /// A stored terminal status is never replaced; the call then returns
    /// [`RecordOutcome::AlreadyTerminal`] with that status. Otherwise the
    /// status, amount and `updated_at` are replaced, the purchase link is
    /// kept if the new record has none, and `attempts` is incremented.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn upsert_payment_record<'a>(&'a self, record: &'a PaymentRecord)
    -> StoreFuture<'a, RecordOutcome>;

    /// Load a record.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn get_payment_record<'a>(&'a self, external_id: &'a str)
    -> StoreFuture<'a, Option<PaymentRecord>>;

    /// Non-terminal records last written before `older_than` and written
    /// fewer than `max_attempts` times, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_unresolved_payments(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
        limit: u32,
    ) -> StoreFuture<'_, Vec<PaymentRecord>>;
}

/// Every table the checkout flow touches.
pub trait Datastore: RaffleStore + TicketStore + PurchaseLedger + PaymentRecordStore {}

impl<T> Datastore for T where T: RaffleStore + TicketStore + PurchaseLedger + PaymentRecordStore {}
