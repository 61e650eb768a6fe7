//! `POST /api/checkout`: hold numbers and open a payment.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use raffle_core::reservation::ReserveRequest;
use raffle_core::types::{Money, PurchaseId, RaffleId};
use serde::{Deserialize, Serialize};

/// Checkout request body.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Raffle to buy from
    pub raffle_id: RaffleId,
    /// Ticket numbers
    pub numbers: Vec<u32>,
    /// Buyer contact
    pub buyer_email: String,
}

/// Checkout response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    /// Created purchase
    pub purchase_id: PurchaseId,
    /// Held numbers, ascending
    pub numbers: Vec<u32>,
    /// Amount to pay, in cents
    pub amount_cents: u64,
    /// Amount to pay, formatted
    pub amount: String,
    /// Gateway preference id
    pub preference_id: String,
    /// Where to send the buyer
    pub redirect_url: String,
    /// The hold ends at this instant
    pub hold_expires_at: DateTime<Utc>,
}

fn amount_fields(amount: Money) -> (u64, String) {
    (amount.cents(), amount.to_string())
}

/// Reserve numbers for a buyer.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/checkout \
///   -H "Content-Type: application/json" \
///   -d '{"raffle_id":"...","numbers":[3,7],"buyer_email":"buyer@example.com"}'
/// ```
///
/// # Errors
///
/// - 422 `validation_error`: malformed body or bad input
/// - 404 `raffle_not_found`
/// - 409 `tickets_not_available` (the numbers are listed in `details`)
/// - 502 `gateway_error`: nothing stays reserved
pub async fn create_checkout(
    State(state): State<AppState>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let Json(request) = body?;

    let reservation = state
        .reservations
        .reserve(ReserveRequest {
            raffle_id: request.raffle_id,
            numbers: request.numbers,
            buyer_email: request.buyer_email,
        })
        .await?;

    let (amount_cents, amount) = amount_fields(reservation.amount);
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            purchase_id: reservation.purchase_id,
            numbers: reservation.numbers,
            amount_cents,
            amount,
            preference_id: reservation.preference_id,
            redirect_url: reservation.redirect_url,
            hold_expires_at: reservation.hold_expires_at,
        }),
    ))
}
