//! HTTP error responses.
//!
//! Bridges [`RaffleError`] and handler failures into JSON bodies of the form
//! `{"code": ..., "message": ..., "details": ...}`.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use raffle_core::error::RaffleError;
use serde::Serialize;
use std::fmt;

/// Application error type for handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Extra structured information for the client
    details: Option<serde_json::Value>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            details: None,
            source: None,
        }
    }

    /// Attach a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "bad_request")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "unauthorized")
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "validation_error")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "internal_error")
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "service_unavailable")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<RaffleError> for AppError {
    fn from(err: RaffleError) -> Self {
        let code = err.code();
        match err {
            RaffleError::Validation(message) => Self::validation(message),
            RaffleError::RaffleNotFound(_) | RaffleError::PurchaseNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string(), code)
            }
            RaffleError::TicketsUnavailable { ref numbers } => {
                let details = serde_json::json!({ "numbers": numbers });
                Self::new(StatusCode::CONFLICT, "Some tickets are no longer available", code)
                    .with_details(details)
            }
            RaffleError::ReservationExpired(_) => Self::new(
                StatusCode::CONFLICT,
                "The reservation expired, please try again",
                code,
            ),
            RaffleError::Gateway(ref source) => {
                let retryable = source.is_retryable();
                Self::new(StatusCode::BAD_GATEWAY, "Payment provider unavailable", code)
                    .with_details(serde_json::json!({ "retryable": retryable }))
                    .with_source(anyhow::Error::new(err))
            }
            RaffleError::Fatal(_) => {
                Self::internal("An internal error occurred").with_source(anyhow::Error::new(err))
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_core::gateway::GatewayError;
    use raffle_core::store::StoreError;
    use raffle_core::types::RaffleId;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[bad_request] Invalid input");
    }

    #[test]
    fn test_raffle_error_mapping() {
        let cases = [
            (RaffleError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (RaffleError::RaffleNotFound(RaffleId::new()), StatusCode::NOT_FOUND),
            (
                RaffleError::TicketsUnavailable { numbers: vec![3] },
                StatusCode::CONFLICT,
            ),
            (RaffleError::Gateway(GatewayError::Timeout), StatusCode::BAD_GATEWAY),
            (
                RaffleError::Fatal(StoreError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let code = err.code();
            let app = AppError::from(err);
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn test_unavailable_tickets_listed() {
        let err = AppError::from(RaffleError::TicketsUnavailable { numbers: vec![4, 7] });
        assert_eq!(err.details, Some(serde_json::json!({ "numbers": [4, 7] })));
    }
}
