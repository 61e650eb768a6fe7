//! `POST /api/webhooks/payments`: payment notifications from the gateway.
//!
//! The gateway retries anything that is not a 2xx, so once a notification is
//! recorded the answer is 200: processed, skipped and deferred alike. A
//! non-2xx reply means the notification was not recorded and should be
//! redelivered.
//!
//! Accepted shapes:
//! - body `{"type": "payment", "data": {"id": "123"}}`
//! - query `?topic=payment&id=123`
//! - query `?type=payment&data.id=123`

use crate::error::AppError;
use crate::signature;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};
use raffle_core::environment::Clock;
use raffle_core::gateway::is_payment_id;
use raffle_core::reconciliation::ReconcileOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SIGNATURE_HEADER: &str = "x-signature";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Default, Deserialize)]
struct NotificationBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    topic: Option<String>,
    data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    id: serde_json::Value,
}

/// What the notification refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Notification {
    kind: Option<String>,
    data_id: Option<String>,
}

fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Merge the body and query forms; the body wins where both are present.
fn parse_notification(query: &HashMap<String, String>, body: &[u8]) -> Notification {
    let body: NotificationBody = if body.is_empty() {
        NotificationBody::default()
    } else {
        serde_json::from_slice(body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Webhook body is not a notification document");
            NotificationBody::default()
        })
    };

    let kind = body
        .kind
        .or(body.topic)
        .or_else(|| query.get("type").cloned())
        .or_else(|| query.get("topic").cloned());
    let data_id = body
        .data
        .as_ref()
        .and_then(|d| id_to_string(&d.id))
        .or_else(|| query.get("data.id").cloned())
        .or_else(|| query.get("id").cloned())
        .filter(|id| !id.trim().is_empty());

    Notification { kind, data_id }
}

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// `processed`, `deferred` or `ignored`
    pub status: &'static str,
    /// Reconciliation result, when processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReconcileOutcome>,
}

impl WebhookAck {
    const fn new(status: &'static str) -> Self {
        Self {
            status,
            result: None,
        }
    }
}

/// Receive a payment notification.
///
/// # Errors
///
/// - 400 when a payment notification carries no id, or one that is not a
///   gateway payment id
/// - 401 when signatures are enforced and this one does not verify
/// - 500 when the notification could not be recorded (the gateway will
///   redeliver)
pub async fn payment_notification(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let notification = parse_notification(&query, &body);

    match notification.kind.as_deref() {
        Some("payment") => {}
        other => {
            tracing::debug!(kind = ?other, "Ignoring non-payment notification");
            return Ok(Json(WebhookAck::new("ignored")));
        }
    }

    let Some(payment_id) = notification.data_id else {
        return Err(AppError::bad_request("Payment notification without an id"));
    };
    if !is_payment_id(&payment_id) {
        tracing::warn!(payment_id = ?payment_id, "Webhook with a malformed payment id");
        return Err(AppError::bad_request("Malformed payment id"));
    }

    if let Some(secret) = state.security.webhook_secret.as_deref() {
        let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let now = state.clock.now();
        if let Err(e) = signature::verify(secret, header, &payment_id, request_id, now) {
            tracing::warn!(%payment_id, error = %e, "Webhook signature rejected");
            return Err(AppError::unauthorized("Invalid webhook signature"));
        }
    }

    match state.engine.reconcile_payment(&payment_id).await {
        Ok(outcome) => {
            tracing::info!(%payment_id, outcome = outcome.label(), "Payment notification processed");
            Ok(Json(WebhookAck {
                status: "processed",
                result: Some(outcome),
            }))
        }
        Err(e) => {
            tracing::warn!(%payment_id, error = %e, "Payment notification deferred");
            state.engine.record_deferred(&payment_id).await?;
            Ok(Json(WebhookAck::new("deferred")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_body_form() {
        let n = parse_notification(&HashMap::new(), br#"{"type":"payment","data":{"id":"42"}}"#);
        assert_eq!(n.kind.as_deref(), Some("payment"));
        assert_eq!(n.data_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_numeric_id() {
        let n = parse_notification(&HashMap::new(), br#"{"type":"payment","data":{"id":42}}"#);
        assert_eq!(n.data_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_query_forms() {
        let topic = parse_notification(&query(&[("topic", "payment"), ("id", "7")]), b"");
        assert_eq!(topic.kind.as_deref(), Some("payment"));
        assert_eq!(topic.data_id.as_deref(), Some("7"));

        let typed = parse_notification(&query(&[("type", "payment"), ("data.id", "8")]), b"not json");
        assert_eq!(typed.kind.as_deref(), Some("payment"));
        assert_eq!(typed.data_id.as_deref(), Some("8"));
    }

    #[test]
    fn test_blank_id_is_missing() {
        let n = parse_notification(&HashMap::new(), br#"{"type":"payment","data":{"id":" "}}"#);
        assert_eq!(n.data_id, None);
    }
}
