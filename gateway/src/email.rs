//! Transactional email over a JSON HTTP API (`POST {api_url}/emails`).

use raffle_core::notification::{EmailMessage, Notifier, NotifyError};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Email provider configuration.
#[derive(Clone, Debug)]
pub struct EmailConfig {
    /// API base URL, without trailing slash
    pub api_url: String,
    /// Provider API key
    pub api_key: String,
    /// Sender address
    pub from: String,
    /// Per-request timeout
    pub timeout: Duration,
}

/// [`Notifier`] backed by an HTTP email provider.
#[derive(Clone, Debug)]
pub struct EmailClient {
    client: Client,
    config: EmailConfig,
}

#[derive(Serialize)]
struct SendBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl EmailClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Request`] if the HTTP client cannot be built.
    pub fn new(config: EmailConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }
}

impl Notifier for EmailClient {
    fn send(
        &self,
        message: EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            let body = SendBody {
                from: &self.config.from,
                to: [message.to.as_str()],
                subject: &message.subject,
                html: &message.html,
            };

            let response = self
                .client
                .post(format!("{}/emails", self.config.api_url.trim_end_matches('/')))
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| NotifyError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(NotifyError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }

            tracing::debug!(subject = %message.subject, "Email accepted by provider");
            Ok(())
        })
    }
}
