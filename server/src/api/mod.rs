//! API endpoints, grouped by caller:
//! - Checkout: buyers reserving numbers
//! - Purchases: buyers returning from the gateway
//! - Raffles: the public ticket grid
//! - Webhooks: payment notifications from the gateway
//! - Admin: operator tooling behind a bearer token

pub mod admin;
pub mod checkout;
pub mod purchases;
pub mod raffles;
pub mod webhooks;

use crate::error::AppError;
use std::str::FromStr;

/// Parse an id from a path segment, answering 422 when it is malformed.
pub(crate) fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::validation(format!("Invalid {what} id: {raw}")))
}
