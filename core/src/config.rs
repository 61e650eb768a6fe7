//! Tunables for the checkout services.
//!
//! Built by the server from environment variables; tests construct them
//! directly.

use crate::gateway::CheckoutUrls;
use chrono::Duration;

/// Reservation settings.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// How long tickets stay `pending` waiting for payment
    pub hold_duration: Duration,
    /// Upper bound on numbers in one purchase
    pub max_numbers_per_purchase: usize,
    /// ISO currency code sent to the gateway
    pub currency: String,
    /// Redirect/notification URL templates (`{purchase_id}` is substituted)
    pub urls: CheckoutUrls,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_duration: Duration::minutes(15),
            max_numbers_per_purchase: 50,
            currency: "ARS".to_string(),
            urls: CheckoutUrls {
                success_url: "http://localhost:8080/purchases/{purchase_id}?result=success"
                    .to_string(),
                failure_url: "http://localhost:8080/purchases/{purchase_id}?result=failure"
                    .to_string(),
                pending_url: "http://localhost:8080/purchases/{purchase_id}?result=pending"
                    .to_string(),
                notification_url: None,
            },
        }
    }
}

/// Expiry sweeper settings.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Maximum purchases (and orphan tickets) handled per sweep
    pub batch_size: u32,
    /// Extra time granted past the hold before a purchase is expired
    pub grace: Duration,
    /// Ask the gateway for a payment before expiring a `pending_payment` purchase
    pub verify_with_gateway: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            grace: Duration::seconds(30),
            verify_with_gateway: false,
        }
    }
}
