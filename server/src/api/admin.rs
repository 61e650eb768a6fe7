//! Operator endpoints. Every handler requires [`Operator`].
//!
//! - `POST /api/admin/reconcile`: re-run reconciliation for a purchase or a
//!   list of payment ids
//! - `POST /api/admin/sweep`: expire overdue holds now
//! - `POST /api/admin/raffles`: create a raffle
//! - `POST /api/admin/raffles/:id/activate`, `.../close`
//! - `DELETE /api/admin/raffles/:id`

use super::parse_id;
use crate::auth::Operator;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use raffle_core::gateway::is_payment_id;
use raffle_core::raffles::{DeleteOutcome, NewRaffle};
use raffle_core::reconciliation::ReconcileOutcome;
use raffle_core::sweeper::SweepReport;
use raffle_core::types::{PurchaseId, Raffle, RaffleId};
use serde::{Deserialize, Serialize};

/// Upper bound on payment ids in one reconcile request.
pub const MAX_PAYMENT_IDS: usize = 100;

/// Reconcile request: a purchase, or explicit payment ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReconcileRequest {
    /// Reconcile one purchase
    Purchase {
        /// Purchase to reconcile
        purchase_id: PurchaseId,
    },
    /// Reconcile each payment
    Payments {
        /// Gateway payment ids
        payment_ids: Vec<String>,
    },
}

/// Result for one reconciled id.
#[derive(Debug, Serialize)]
pub struct ReconcileResult {
    /// Purchase or payment id
    pub id: String,
    /// Outcome, when reconciliation ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReconcileOutcome>,
    /// Error code, when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileResult {
    fn new(id: String, result: Result<ReconcileOutcome, raffle_core::RaffleError>) -> Self {
        match result {
            Ok(outcome) => Self {
                id,
                result: Some(outcome),
                error: None,
            },
            Err(e) => {
                tracing::warn!(%id, error = %e, "Admin reconcile failed");
                Self {
                    id,
                    result: None,
                    error: Some(e.code().to_string()),
                }
            }
        }
    }
}

/// Reconcile response.
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// One entry per requested id, in request order
    pub results: Vec<ReconcileResult>,
}

/// Re-run reconciliation synchronously.
///
/// A purchase that does not exist is a 404; per-payment failures are
/// reported in the results.
///
/// # Errors
///
/// - 401 without the operator token
/// - 422 for a malformed body or payment id
/// - 404 `purchase_not_found`
pub async fn reconcile(
    _operator: Operator,
    State(state): State<AppState>,
    body: Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let Json(request) = body?;

    let results = match request {
        ReconcileRequest::Purchase { purchase_id } => {
            let outcome = state.engine.reconcile_purchase(purchase_id).await?;
            vec![ReconcileResult::new(purchase_id.to_string(), Ok(outcome))]
        }
        ReconcileRequest::Payments { payment_ids } => {
            if payment_ids.is_empty() || payment_ids.len() > MAX_PAYMENT_IDS {
                return Err(AppError::validation(format!(
                    "payment_ids must hold between 1 and {MAX_PAYMENT_IDS} ids"
                )));
            }
            if let Some(bad) = payment_ids.iter().find(|id| !is_payment_id(id)) {
                return Err(AppError::validation(format!("Invalid payment id: {bad:?}")));
            }
            let mut results = Vec::with_capacity(payment_ids.len());
            for payment_id in payment_ids {
                let result = state.engine.reconcile_payment(&payment_id).await;
                results.push(ReconcileResult::new(payment_id, result));
            }
            results
        }
    };

    Ok(Json(ReconcileResponse { results }))
}

/// Sweep request.
#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    /// Only sweep this raffle
    pub raffle_id: Option<RaffleId>,
}

/// Run one sweep now.
///
/// The body is optional; an empty body sweeps every raffle. A body that is
/// present must be a valid [`SweepRequest`].
///
/// # Errors
///
/// - 401 without the operator token
/// - 422 for a malformed body
/// - 500 when the datastore fails
pub async fn sweep(
    _operator: Operator,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SweepReport>, AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        SweepRequest::default()
    } else {
        serde_json::from_slice::<SweepRequest>(&body)
            .map_err(|e| AppError::validation(format!("Invalid sweep request: {e}")))?
    };
    let report = state.sweeper.sweep(request.raffle_id).await?;
    Ok(Json(report))
}

/// Create a raffle (as `draft`).
///
/// # Errors
///
/// - 401 without the operator token
/// - 422 for invalid input
pub async fn create_raffle(
    _operator: Operator,
    State(state): State<AppState>,
    body: Result<Json<NewRaffle>, JsonRejection>,
) -> Result<(StatusCode, Json<Raffle>), AppError> {
    let Json(input) = body?;
    let raffle = state.raffles.create_raffle(input).await?;
    Ok((StatusCode::CREATED, Json(raffle)))
}

/// Put a draft raffle on sale.
///
/// # Errors
///
/// - 401 without the operator token
/// - 404 `raffle_not_found`
/// - 422 when the raffle is not a draft
pub async fn activate_raffle(
    _operator: Operator,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Raffle>, AppError> {
    let raffle_id: RaffleId = parse_id(&id, "raffle")?;
    Ok(Json(state.raffles.activate(raffle_id).await?))
}

/// Stop sales.
///
/// # Errors
///
/// - 401 without the operator token
/// - 404 `raffle_not_found`
/// - 422 when the raffle is not active
pub async fn close_raffle(
    _operator: Operator,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Raffle>, AppError> {
    let raffle_id: RaffleId = parse_id(&id, "raffle")?;
    Ok(Json(state.raffles.close(raffle_id).await?))
}

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// Deleted raffle
    pub raffle_id: RaffleId,
    /// `removed` or `archived`
    pub outcome: DeleteOutcome,
}

/// Delete a raffle; one with held or sold tickets is archived instead.
///
/// # Errors
///
/// - 401 without the operator token
/// - 404 `raffle_not_found`
pub async fn delete_raffle(
    _operator: Operator,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let raffle_id: RaffleId = parse_id(&id, "raffle")?;
    let outcome = state.raffles.delete(raffle_id).await?;
    Ok(Json(DeleteResponse { raffle_id, outcome }))
}
