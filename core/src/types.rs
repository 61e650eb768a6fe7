//! Domain types for raffle checkout.
//!
//! Identifiers, money, and the three durable records the checkout flow
//! mutates: [`Raffle`], [`Ticket`] and [`Purchase`], plus the
//! [`PaymentRecord`] audit row used to make reconciliation idempotent.

use crate::gateway::GatewayPaymentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a raffle
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RaffleId(Uuid);

impl RaffleId {
    /// Creates a new random `RaffleId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RaffleId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RaffleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RaffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RaffleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a purchase (one checkout attempt)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PurchaseId(Uuid);

impl PurchaseId {
    /// Creates a new random `PurchaseId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PurchaseId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PurchaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PurchaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Decimal representation used by payment gateways (`12.50`).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Ticket prices stay far below 2^52 cents
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Parses a gateway decimal amount, rounding to the nearest cent.
    ///
    /// Returns `None` for negative or non-finite values.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_decimal(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        Some(Self((amount * 100.0).round() as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Raffle
// ============================================================================

/// Raffle lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaffleStatus {
    /// Created, not yet on sale
    Draft,
    /// Accepting purchases
    Active,
    /// Sales closed
    Closed,
    /// Soft-deleted (kept because tickets were sold or held)
    Deleted,
}

impl RaffleStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Deleted => "deleted",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A raffle with `total_tickets` numbered tickets (`1..=total_tickets`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raffle {
    /// Unique raffle identifier
    pub id: RaffleId,
    /// Display title
    pub title: String,
    /// Price of a single ticket
    pub unit_price: Money,
    /// Number of tickets; numbers run from 1 to this value
    pub total_tickets: u32,
    /// Lifecycle status
    pub status: RaffleStatus,
    /// Sales stop at this instant
    pub ends_at: DateTime<Utc>,
    /// Creator contact, receives sale notifications
    pub creator_email: String,
    /// When the raffle was created
    pub created_at: DateTime<Utc>,
}

impl Raffle {
    /// Whether `number` is a valid ticket number for this raffle.
    #[must_use]
    pub const fn contains_number(&self, number: u32) -> bool {
        number >= 1 && number <= self.total_tickets
    }

    /// Whether buyers can currently reserve tickets.
    #[must_use]
    pub fn is_open_for_sale(&self, now: DateTime<Utc>) -> bool {
        self.status == RaffleStatus::Active && now < self.ends_at
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Ticket availability status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Free to reserve
    Available,
    /// Held by a purchase until its hold expires
    Pending,
    /// Paid for
    Sold,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Pending => "pending",
            Self::Sold => "sold",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "pending" => Some(Self::Pending),
            "sold" => Some(Self::Sold),
            _ => None,
        }
    }
}

/// One numbered ticket of a raffle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Owning raffle
    pub raffle_id: RaffleId,
    /// Ticket number, unique within the raffle
    pub number: u32,
    /// Current status
    pub status: TicketStatus,
    /// Purchase holding or owning the ticket
    pub purchase_id: Option<PurchaseId>,
    /// End of the hold while `pending`
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Creates an available ticket
    #[must_use]
    pub const fn available(raffle_id: RaffleId, number: u32) -> Self {
        Self {
            raffle_id,
            number,
            status: TicketStatus::Available,
            purchase_id: None,
            hold_expires_at: None,
        }
    }

    /// Whether the ticket is currently held by `purchase_id`.
    #[must_use]
    pub fn is_held_by(&self, purchase_id: PurchaseId) -> bool {
        self.status == TicketStatus::Pending && self.purchase_id == Some(purchase_id)
    }
}

/// A guarded ticket state change.
///
/// Each variant names both the expected pre-state and the new state, so a
/// store applies it as a single compare-and-set on one ticket row. A
/// transition whose pre-state does not match is rejected, never forced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketTransition {
    /// `available → pending`, owned by `purchase_id` until `hold_expires_at`.
    Hold {
        /// Purchase taking the hold
        purchase_id: PurchaseId,
        /// End of the hold
        hold_expires_at: DateTime<Utc>,
    },
    /// `pending(purchase_id) → available`, clearing owner and hold.
    Release {
        /// Purchase that must currently hold the ticket
        purchase_id: PurchaseId,
    },
    /// `pending(purchase_id) → sold(purchase_id)`.
    Sell {
        /// Purchase that must currently hold the ticket
        purchase_id: PurchaseId,
    },
}

impl TicketTransition {
    /// Applies the transition to `ticket` if its pre-state matches.
    ///
    /// Returns `false` and leaves the ticket untouched otherwise.
    pub fn apply(&self, ticket: &mut Ticket) -> bool {
        match *self {
            Self::Hold {
                purchase_id,
                hold_expires_at,
            } => {
                if ticket.status != TicketStatus::Available {
                    return false;
                }
                ticket.status = TicketStatus::Pending;
                ticket.purchase_id = Some(purchase_id);
                ticket.hold_expires_at = Some(hold_expires_at);
                true
            }
            Self::Release { purchase_id } => {
                if !ticket.is_held_by(purchase_id) {
                    return false;
                }
                ticket.status = TicketStatus::Available;
                ticket.purchase_id = None;
                ticket.hold_expires_at = None;
                true
            }
            Self::Sell { purchase_id } => {
                if !ticket.is_held_by(purchase_id) {
                    return false;
                }
                ticket.status = TicketStatus::Sold;
                ticket.hold_expires_at = None;
                true
            }
        }
    }

    /// Purchase the transition acts for.
    #[must_use]
    pub const fn purchase_id(&self) -> PurchaseId {
        match *self {
            Self::Hold { purchase_id, .. }
            | Self::Release { purchase_id }
            | Self::Sell { purchase_id } => purchase_id,
        }
    }
}

/// Ticket counts per status for one raffle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCounts {
    /// Tickets free to reserve
    pub available: u32,
    /// Tickets on hold
    pub pending: u32,
    /// Tickets paid for
    pub sold: u32,
}

// ============================================================================
// Purchases
// ============================================================================

/// Purchase lifecycle status
///
/// `initiated → pending_payment → approved | rejected | expired`. The last
/// three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Tickets are being claimed
    Initiated,
    /// Gateway preference created, waiting for the buyer to pay
    PendingPayment,
    /// Payment approved, tickets sold
    Approved,
    /// Payment rejected or cancelled, tickets released
    Rejected,
    /// Hold expired (or reservation rolled back), tickets released
    Expired,
}

impl PurchaseStatus {
    /// Statuses a purchase can still leave.
    pub const OPEN: [Self; 2] = [Self::Initiated, Self::PendingPayment];

    /// Whether the status will never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired)
    }

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::PendingPayment => "pending_payment",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "pending_payment" => Some(Self::PendingPayment),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Status shown to a buyer returning from the gateway.
    #[must_use]
    pub const fn buyer_status(&self) -> BuyerStatus {
        match self {
            Self::Approved => BuyerStatus::Approved,
            Self::Rejected => BuyerStatus::Rejected,
            Self::Expired => BuyerStatus::Expired,
            Self::Initiated | Self::PendingPayment => BuyerStatus::Pending,
        }
    }
}

/// Buyer-facing purchase status. Anything not known to be final reads `pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerStatus {
    /// Paid, tickets are yours
    Approved,
    /// Still waiting on the payment outcome
    Pending,
    /// Payment was not accepted
    Rejected,
    /// The hold ran out before a payment arrived
    Expired,
}

/// Idempotency markers for purchase notifications
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Approval email to the buyer
    Buyer,
    /// Sale email to the raffle creator
    Creator,
}

impl NotificationKind {
    /// Short label for logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Creator => "creator",
        }
    }
}

/// One checkout attempt for a set of ticket numbers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Unique purchase identifier
    pub id: PurchaseId,
    /// Raffle the tickets belong to
    pub raffle_id: RaffleId,
    /// Requested ticket numbers, ascending, fixed at creation
    pub numbers: Vec<u32>,
    /// Buyer contact
    pub buyer_email: String,
    /// Total to pay (`unit_price × numbers.len()`)
    pub amount: Money,
    /// Lifecycle status
    pub status: PurchaseStatus,
    /// Gateway preference id, once created
    pub preference_id: Option<String>,
    /// Gateway payment id, once known
    pub payment_id: Option<String>,
    /// End of the ticket hold
    pub hold_expires_at: DateTime<Utc>,
    /// Buyer approval email was claimed for sending
    pub emailed_buyer: bool,
    /// Creator sale email was claimed for sending
    pub emailed_creator: bool,
    /// When the purchase was created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Creates a new `initiated` purchase. Numbers are sorted and deduplicated.
    #[must_use]
    pub fn new(
        raffle_id: RaffleId,
        mut numbers: Vec<u32>,
        buyer_email: String,
        amount: Money,
        hold_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        numbers.sort_unstable();
        numbers.dedup();
        Self {
            id: PurchaseId::new(),
            raffle_id,
            numbers,
            buyer_email,
            amount,
            status: PurchaseStatus::Initiated,
            preference_id: None,
            payment_id: None,
            hold_expires_at,
            emailed_buyer: false,
            emailed_creator: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the given notification marker is already set.
    #[must_use]
    pub const fn notified(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Buyer => self.emailed_buyer,
            NotificationKind::Creator => self.emailed_creator,
        }
    }
}

// ============================================================================
// Payment records
// ============================================================================

/// Reconciliation audit row, unique per gateway payment id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Gateway payment id
    pub external_id: String,
    /// Last status seen at the gateway
    pub status: GatewayPaymentStatus,
    /// Amount reported by the gateway
    pub amount: Option<Money>,
    /// Purchase the payment belongs to, when resolved
    pub purchase_id: Option<PurchaseId>,
    /// Number of times the record was written
    pub attempts: u32,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a record for a freshly observed payment status.
    #[must_use]
    pub fn new(
        external_id: impl Into<String>,
        status: GatewayPaymentStatus,
        amount: Option<Money>,
        purchase_id: Option<PurchaseId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            status,
            amount,
            purchase_id,
            attempts: 1,
            updated_at: now,
        }
    }
}

/// Result of upserting a [`PaymentRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time this payment id was seen
    Inserted,
    /// Replaced a non-terminal status
    Updated,
    /// The stored status was already terminal; nothing was written
    AlreadyTerminal(GatewayPaymentStatus),
}
