//! `GET /api/purchases/:id/status`: where a buyer lands after paying.

use super::parse_id;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use raffle_core::error::RaffleError;
use raffle_core::gateway::is_payment_id;
use raffle_core::types::{BuyerStatus, PurchaseId};
use serde::{Deserialize, Serialize};

/// Query parameters the gateway appends to its return redirect.
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Gateway payment id, when the redirect carries one
    pub payment_id: Option<String>,
}

/// Buyer-facing purchase status.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseStatusResponse {
    /// Purchase
    pub purchase_id: PurchaseId,
    /// `approved`, `pending`, `rejected` or `expired`
    pub status: BuyerStatus,
    /// Numbers in the purchase
    pub numbers: Vec<u32>,
}

/// Report a purchase's status to its buyer.
///
/// With `payment_id`, an open purchase is reconciled against the gateway
/// first so the buyer does not wait on the webhook. A failed attempt is
/// logged and the stored status is returned.
///
/// # Errors
///
/// - 422 for a malformed purchase or payment id
/// - 404 `purchase_not_found`
pub async fn get_purchase_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PurchaseStatusResponse>, AppError> {
    let purchase_id: PurchaseId = parse_id(&id, "purchase")?;
    let malformed = query
        .payment_id
        .as_deref()
        .is_some_and(|p| !p.is_empty() && !is_payment_id(p));
    if malformed {
        return Err(AppError::validation("Invalid payment id"));
    }
    let mut purchase = state
        .store
        .get_purchase(purchase_id)
        .await
        .map_err(RaffleError::from)?
        .ok_or(RaffleError::PurchaseNotFound(purchase_id))?;

    let payment_id = query
        .payment_id
        .as_deref()
        .filter(|p| !p.is_empty() && !purchase.status.is_terminal());
    if let Some(payment_id) = payment_id {
        match state.engine.reconcile_payment(payment_id).await {
            Ok(outcome) => {
                tracing::debug!(%purchase_id, outcome = outcome.label(), "Reconciled on return");
                if let Some(fresh) = state
                    .store
                    .get_purchase(purchase_id)
                    .await
                    .map_err(RaffleError::from)?
                {
                    purchase = fresh;
                }
            }
            Err(e) => {
                tracing::warn!(%purchase_id, payment_id, error = %e, "Return reconciliation failed");
            }
        }
    }

    Ok(Json(PurchaseStatusResponse {
        purchase_id,
        status: purchase.status.buyer_status(),
        numbers: purchase.numbers,
    }))
}
