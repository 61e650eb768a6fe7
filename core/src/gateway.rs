//! Payment gateway abstraction.
//!
//! The gateway is an unreliable external dependency. Checkout creates a
//! *preference* (a hosted payment page the buyer is redirected to); the
//! gateway later reports *payments* made against it, which reconciliation
//! fetches by their external id.
//!
//! # Implementations
//!
//! - `MercadoPagoGateway` (in `raffle-gateway`): REST client
//! - `ScriptedGateway` (in `raffle-testing`): deterministic test double

use crate::types::{Money, PurchaseId, RaffleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by [`PaymentGateway`] methods.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network-level failure reaching the gateway
    #[error("Gateway request failed: {0}")]
    Request(String),

    /// The gateway did not answer in time
    #[error("Gateway timeout")]
    Timeout,

    /// Too many requests
    #[error("Gateway rate limited")]
    RateLimited,

    /// Credentials rejected
    #[error("Gateway rejected credentials")]
    Unauthorized,

    /// Unknown payment or preference
    #[error("Not found at gateway: {0}")]
    NotFound(String),

    /// The gateway answered with an error status
    #[error("Gateway API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error body
        message: String,
    },

    /// The gateway answered with a body we could not read
    #[error("Gateway response parsing failed: {0}")]
    ResponseParse(String),
}

impl GatewayError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout | Self::RateLimited => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Unauthorized | Self::NotFound(_) | Self::ResponseParse(_) => false,
        }
    }
}

/// Payment status as reported by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    /// Payment accredited
    Approved,
    /// Authorized, not yet captured
    Authorized,
    /// Buyer has not completed the payment
    Pending,
    /// Under review
    InProcess,
    /// Disputed
    InMediation,
    /// Declined
    Rejected,
    /// Cancelled or timed out at the gateway
    Cancelled,
    /// Returned to the buyer
    Refunded,
    /// Charged back by the card issuer
    ChargedBack,
    /// Not fetched yet, or a status this service does not know
    Unknown,
}

impl GatewayPaymentStatus {
    /// Parse a gateway status string. Unrecognised values map to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "authorized" => Self::Authorized,
            "pending" => Self::Pending,
            "in_process" => Self::InProcess,
            "in_mediation" => Self::InMediation,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            "charged_back" => Self::ChargedBack,
            _ => Self::Unknown,
        }
    }

    /// Convert status to its gateway/database string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Authorized => "authorized",
            Self::Pending => "pending",
            Self::InProcess => "in_process",
            Self::InMediation => "in_mediation",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::ChargedBack => "charged_back",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the gateway will not report another status for this payment
    /// that matters to ticket state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Cancelled | Self::Refunded | Self::ChargedBack
        )
    }

    /// The purchase outcome this status settles, if any.
    #[must_use]
    pub const fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::Approved => Some(Resolution::Approved),
            Self::Rejected | Self::Cancelled => Some(Resolution::Rejected),
            _ => None,
        }
    }
}

/// Terminal purchase outcome derived from a gateway status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Tickets become sold
    Approved,
    /// Tickets go back on sale
    Rejected,
}

/// Where the gateway sends the buyer and its notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutUrls {
    /// Redirect after an approved payment
    pub success_url: String,
    /// Redirect after a rejected payment
    pub failure_url: String,
    /// Redirect while the payment is pending
    pub pending_url: String,
    /// Webhook endpoint for payment notifications
    pub notification_url: Option<String>,
}

impl CheckoutUrls {
    /// Placeholder replaced by the purchase id in each URL.
    pub const PURCHASE_PLACEHOLDER: &'static str = "{purchase_id}";

    /// URLs with `{purchase_id}` substituted.
    #[must_use]
    pub fn for_purchase(&self, purchase_id: PurchaseId) -> Self {
        let id = purchase_id.to_string();
        let fill = |url: &str| url.replace(Self::PURCHASE_PLACEHOLDER, &id);
        Self {
            success_url: fill(self.success_url.as_str()),
            failure_url: fill(self.failure_url.as_str()),
            pending_url: fill(self.pending_url.as_str()),
            notification_url: self.notification_url.as_deref().map(fill),
        }
    }
}

/// Longest payment id accepted from callers.
pub const MAX_PAYMENT_ID_LEN: usize = 64;

/// Whether `id` has the shape of a gateway payment id: 1 to
/// [`MAX_PAYMENT_ID_LEN`] ASCII letters, digits, `-` or `_`.
///
/// Ids arriving from buyers and webhooks are checked with this before they
/// reach the gateway or the payment records.
#[must_use]
pub fn is_payment_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_PAYMENT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Request to create a hosted payment preference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreferenceRequest {
    /// Purchase being paid for; also sent as the external reference
    pub purchase_id: PurchaseId,
    /// Raffle the tickets belong to
    pub raffle_id: RaffleId,
    /// Line item title shown at the gateway
    pub title: String,
    /// Number of tickets
    pub quantity: u32,
    /// Price of one ticket
    pub unit_price: Money,
    /// ISO currency code
    pub currency: String,
    /// Buyer email, prefilled at the gateway
    pub payer_email: String,
    /// Redirect and notification URLs
    pub urls: CheckoutUrls,
    /// The preference stops accepting payments after this instant
    pub expires_at: DateTime<Utc>,
}

impl PreferenceRequest {
    /// Total amount (`unit_price × quantity`), if it does not overflow.
    #[must_use]
    pub const fn total(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// A created preference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    /// Gateway preference id
    pub preference_id: String,
    /// URL the buyer is redirected to
    pub redirect_url: String,
}

/// Reconciliation metadata embedded in a preference and echoed on payments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    /// Purchase the payment is for
    pub purchase_id: Option<PurchaseId>,
    /// Raffle the purchase belongs to
    pub raffle_id: Option<RaffleId>,
}

/// A payment as fetched from the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Gateway payment id
    pub external_id: String,
    /// Current status
    pub status: GatewayPaymentStatus,
    /// Amount paid
    pub amount: Option<Money>,
    /// Structured metadata, when the gateway echoes it
    pub metadata: PaymentMetadata,
    /// External reference set on the preference (the purchase id)
    pub external_reference: Option<String>,
    /// Preference the payment was made against
    pub preference_id: Option<String>,
}

/// Payment gateway trait
///
/// Abstraction over hosted-checkout processors. Every call is I/O; failures
/// must surface as [`GatewayError`], never be swallowed.
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted payment preference.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway is unreachable or rejects the request.
    fn create_preference(&self, request: PreferenceRequest) -> GatewayFuture<'_, Preference>;

    /// Fetch a payment by its gateway id.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway is unreachable or the payment is unknown.
    fn get_payment<'a>(&'a self, external_id: &'a str) -> GatewayFuture<'a, PaymentDetails>;

    /// Find the most relevant payment made for an external reference.
    ///
    /// Prefers an approved payment, then the most recent one.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway is unreachable.
    fn find_payment_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> GatewayFuture<'a, Option<PaymentDetails>>;
}
