//! Error taxonomy for checkout operations.

use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::types::{PurchaseId, RaffleId};
use thiserror::Error;

/// Errors surfaced to callers of the checkout services.
///
/// Duplicate or out-of-order webhooks and unknown purchases are not errors;
/// reconciliation reports them as skipped outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaffleError {
    /// Bad input. No side effects were made.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The raffle does not exist.
    #[error("Raffle {0} not found")]
    RaffleNotFound(RaffleId),

    /// The purchase does not exist.
    #[error("Purchase {0} not found")]
    PurchaseNotFound(PurchaseId),

    /// Some requested tickets are held or sold. Nothing was left reserved.
    #[error("Tickets not available: {numbers:?}")]
    TicketsUnavailable {
        /// Numbers that could not be claimed
        numbers: Vec<u32>,
    },

    /// The hold ended while checkout was still running. Tickets were released.
    #[error("Reservation {0} expired before checkout completed")]
    ReservationExpired(PurchaseId),

    /// The payment gateway failed. Any reservation was rolled back.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Unexpected datastore failure.
    #[error("Datastore failure: {0}")]
    Fatal(#[from] StoreError),
}

impl RaffleError {
    /// Stable machine-readable code for API clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RaffleNotFound(_) => "raffle_not_found",
            Self::PurchaseNotFound(_) => "purchase_not_found",
            Self::TicketsUnavailable { .. } => "tickets_not_available",
            Self::ReservationExpired(_) => "reservation_expired",
            Self::Gateway(_) => "gateway_error",
            Self::Fatal(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the same request later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(err) => err.is_retryable(),
            Self::ReservationExpired(_) | Self::Fatal(_) => true,
            Self::Validation(_)
            | Self::RaffleNotFound(_)
            | Self::PurchaseNotFound(_)
            | Self::TicketsUnavailable { .. } => false,
        }
    }
}
