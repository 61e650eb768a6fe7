//! Operator authentication for the admin endpoints.

use crate::error::AppError;
use crate::state::AppState;
use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};

/// Proof that the request carried the operator bearer token.
///
/// Rejects with 401 when the header is missing or wrong, and when no
/// operator token is configured.
#[derive(Debug, Clone, Copy)]
pub struct Operator;

#[async_trait]
impl FromRequestParts<AppState> for Operator {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.security.operator_token.as_deref() else {
            tracing::warn!("Admin request rejected: no operator token configured");
            return Err(AppError::unauthorized("Admin access is disabled"));
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(token) if constant_time_eq::constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
                Ok(Self)
            }
            Some(_) => {
                tracing::warn!("Admin request rejected: bad token");
                Err(AppError::unauthorized("Invalid operator token"))
            }
            None => Err(AppError::unauthorized("Missing bearer token")),
        }
    }
}
