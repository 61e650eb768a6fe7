//! Mercado Pago Checkout Pro client.
//!
//! - `POST /checkout/preferences` creates the hosted payment page. The
//!   purchase id travels both as `external_reference` and inside `metadata`,
//!   which the gateway echoes on every payment made against the preference.
//! - `GET /v1/payments/{id}` fetches one payment.
//! - `GET /v1/payments/search` finds payments by external reference.
//!
//! Reads are retried with backoff on retryable errors. Preference creation
//! is sent once, with the purchase id as idempotency key.

use crate::retry::{RetryPolicy, retry_with_predicate};
use raffle_core::gateway::{
    GatewayError, GatewayFuture, GatewayPaymentStatus, GatewayResult, PaymentDetails,
    PaymentGateway, PaymentMetadata, Preference, PreferenceRequest,
};
use raffle_core::types::{Money, PurchaseId, RaffleId};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Production API base URL.
pub const DEFAULT_API_URL: &str = "https://api.mercadopago.com";

/// Client configuration.
#[derive(Clone, Debug)]
pub struct MercadoPagoConfig {
    /// API base URL, without trailing slash
    pub api_url: String,
    /// Seller access token
    pub access_token: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Backoff for payment lookups
    pub retry: RetryPolicy,
}

impl MercadoPagoConfig {
    /// Configuration against the production API with default timeouts.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// [`PaymentGateway`] over the Mercado Pago REST API.
#[derive(Clone, Debug)]
pub struct MercadoPagoGateway {
    client: Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoGateway {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Request`] if the HTTP client cannot be built.
    pub fn new(config: MercadoPagoConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    /// `/v1/payments/{id}` with the id percent-encoded as one path segment.
    fn payment_url(&self, external_id: &str) -> GatewayResult<Url> {
        let mut url =
            Url::parse(&self.config.api_url).map_err(|e| GatewayError::Request(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::Request(format!("not a base URL: {}", self.config.api_url)))?
            .pop_if_empty()
            .extend(["v1", "payments", external_id]);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> GatewayResult<T> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::ResponseParse(e.to_string())),
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(GatewayError::RateLimited),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(GatewayError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn fetch_payment(&self, external_id: &str) -> GatewayResult<PaymentDetails> {
        if external_id.is_empty() || matches!(external_id, "." | "..") {
            return Err(GatewayError::NotFound(external_id.to_string()));
        }
        let request = self.client.get(self.payment_url(external_id)?);
        let payment: PaymentBody = self.send(request, external_id).await?;
        Ok(payment.into_details())
    }

    async fn search_payments(&self, reference: &str) -> GatewayResult<Vec<PaymentDetails>> {
        let request = self.client.get(self.url("/v1/payments/search")).query(&[
            ("external_reference", reference),
            ("sort", "date_created"),
            ("criteria", "desc"),
        ]);
        let page: SearchBody = self.send(request, reference).await?;
        Ok(page.results.into_iter().map(PaymentBody::into_details).collect())
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Request(e.to_string())
    }
}

/// The approved payment if any, else the first (most recent) one.
fn most_relevant(payments: Vec<PaymentDetails>) -> Option<PaymentDetails> {
    let approved = payments
        .iter()
        .position(|p| p.status == GatewayPaymentStatus::Approved);
    let index = approved.unwrap_or(0);
    payments.into_iter().nth(index)
}

impl PaymentGateway for MercadoPagoGateway {
    fn create_preference(&self, request: PreferenceRequest) -> GatewayFuture<'_, Preference> {
        Box::pin(async move {
            let body = PreferenceBody::from_request(&request);
            let http = self
                .client
                .post(self.url("/checkout/preferences"))
                .header("X-Idempotency-Key", request.purchase_id.to_string())
                .json(&body);

            let created: PreferenceCreated = self.send(http, "preference").await?;
            tracing::info!(
                purchase_id = %request.purchase_id,
                preference_id = %created.id,
                "Gateway preference created"
            );

            Ok(Preference {
                preference_id: created.id,
                redirect_url: created.init_point,
            })
        })
    }

    fn get_payment<'a>(&'a self, external_id: &'a str) -> GatewayFuture<'a, PaymentDetails> {
        Box::pin(async move {
            retry_with_predicate(
                &self.config.retry,
                move || self.fetch_payment(external_id),
                GatewayError::is_retryable,
            )
            .await
        })
    }

    fn find_payment_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> GatewayFuture<'a, Option<PaymentDetails>> {
        Box::pin(async move {
            let payments = retry_with_predicate(
                &self.config.retry,
                move || self.search_payments(reference),
                GatewayError::is_retryable,
            )
            .await?;
            Ok(most_relevant(payments))
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct PreferenceBody {
    items: Vec<ItemBody>,
    payer: PayerBody,
    external_reference: String,
    metadata: MetadataBody,
    back_urls: BackUrlsBody,
    auto_return: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<String>,
    expires: bool,
    expiration_date_to: String,
}

#[derive(Serialize)]
struct ItemBody {
    id: String,
    title: String,
    quantity: u32,
    unit_price: f64,
    currency_id: String,
}

#[derive(Serialize)]
struct PayerBody {
    email: String,
}

#[derive(Serialize, Deserialize, Default)]
struct MetadataBody {
    #[serde(default)]
    purchase_id: Option<String>,
    #[serde(default)]
    raffle_id: Option<String>,
}

#[derive(Serialize)]
struct BackUrlsBody {
    success: String,
    failure: String,
    pending: String,
}

impl PreferenceBody {
    fn from_request(request: &PreferenceRequest) -> Self {
        let urls = &request.urls;
        Self {
            items: vec![ItemBody {
                id: request.raffle_id.to_string(),
                title: request.title.clone(),
                quantity: request.quantity,
                unit_price: request.unit_price.as_decimal(),
                currency_id: request.currency.clone(),
            }],
            payer: PayerBody {
                email: request.payer_email.clone(),
            },
            external_reference: request.purchase_id.to_string(),
            metadata: MetadataBody {
                purchase_id: Some(request.purchase_id.to_string()),
                raffle_id: Some(request.raffle_id.to_string()),
            },
            back_urls: BackUrlsBody {
                success: urls.success_url.clone(),
                failure: urls.failure_url.clone(),
                pending: urls.pending_url.clone(),
            },
            auto_return: "approved",
            notification_url: urls.notification_url.clone(),
            expires: true,
            expiration_date_to: request
                .expires_at
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

#[derive(Deserialize)]
struct PreferenceCreated {
    id: String,
    init_point: String,
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    results: Vec<PaymentBody>,
}

#[derive(Deserialize)]
struct PaymentBody {
    id: serde_json::Value,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transaction_amount: Option<f64>,
    #[serde(default)]
    metadata: Option<MetadataBody>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    preference_id: Option<String>,
}

impl PaymentBody {
    fn into_details(self) -> PaymentDetails {
        // Payment ids arrive as JSON numbers; notifications carry them as strings.
        let external_id = match self.id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        };
        let metadata = self.metadata.unwrap_or_default();

        PaymentDetails {
            external_id,
            status: self
                .status
                .as_deref()
                .map_or(GatewayPaymentStatus::Unknown, GatewayPaymentStatus::parse),
            amount: self.transaction_amount.and_then(Money::from_decimal),
            metadata: PaymentMetadata {
                purchase_id: metadata.purchase_id.and_then(|id| id.parse::<PurchaseId>().ok()),
                raffle_id: metadata.raffle_id.and_then(|id| id.parse::<RaffleId>().ok()),
            },
            external_reference: self.external_reference.filter(|r| !r.is_empty()),
            preference_id: self.preference_id,
        }
    }
}
