//! At-most-once purchase notifications.
//!
//! Each purchase carries two persisted markers (`emailed_buyer`,
//! `emailed_creator`). A send happens only after the caller wins the
//! marker with [`PurchaseLedger::claim_notification`], so concurrent or
//! retried webhook deliveries cannot send the same email twice. A failed send
//! clears the marker again, letting a later delivery retry it.
//!
//! [`PurchaseLedger::claim_notification`]: crate::store::PurchaseLedger::claim_notification

use crate::store::Datastore;
use crate::types::{NotificationKind, Purchase, Raffle};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Email delivery error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The email provider could not be reached
    #[error("Email request failed: {0}")]
    Request(String),

    /// The email provider refused the message
    #[error("Email rejected (status {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Provider message
        message: String,
    },
}

/// A rendered email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html: String,
}

/// Outbound email channel.
pub trait Notifier: Send + Sync {
    /// Send one email.
    ///
    /// # Errors
    ///
    /// Returns error if the provider is unreachable or rejects the message.
    fn send(
        &self,
        message: EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// What a dispatch did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Buyer email sent by this call
    pub buyer_sent: bool,
    /// Creator email sent by this call
    pub creator_sent: bool,
}

/// Sends approval emails gated by the purchase markers.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn Datastore>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Send the buyer approval and creator sale emails for an approved
    /// purchase, each at most once.
    ///
    /// Never fails: delivery and marker errors are logged and the marker is
    /// left unset for a later attempt.
    #[tracing::instrument(skip_all, fields(purchase_id = %purchase.id))]
    pub async fn dispatch_approved(&self, purchase: &Purchase, raffle: &Raffle) -> DispatchReport {
        DispatchReport {
            buyer_sent: self
                .send_once(purchase, NotificationKind::Buyer, buyer_approval_email(purchase, raffle))
                .await,
            creator_sent: self
                .send_once(purchase, NotificationKind::Creator, creator_sale_email(purchase, raffle))
                .await,
        }
    }

    async fn send_once(&self, purchase: &Purchase, kind: NotificationKind, message: EmailMessage) -> bool {
        if purchase.notified(kind) {
            return false;
        }

        match self.store.claim_notification(purchase.id, kind).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(kind = kind.as_str(), "Notification already claimed");
                return false;
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Failed to claim notification marker");
                return false;
            }
        }

        match self.notifier.send(message).await {
            Ok(()) => {
                metrics::counter!("raffle_emails_sent_total", "kind" => kind.as_str()).increment(1);
                tracing::info!(kind = kind.as_str(), "Notification sent");
                true
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Notification failed, releasing marker");
                if let Err(e) = self.store.release_notification(purchase.id, kind).await {
                    tracing::error!(kind = kind.as_str(), error = %e, "Failed to release notification marker");
                }
                false
            }
        }
    }
}

fn numbers_list(purchase: &Purchase) -> String {
    purchase
        .numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Approval email for the buyer.
#[must_use]
pub fn buyer_approval_email(purchase: &Purchase, raffle: &Raffle) -> EmailMessage {
    EmailMessage {
        to: purchase.buyer_email.clone(),
        subject: format!("Your tickets for {}", raffle.title),
        html: format!(
            "<p>Your payment was approved.</p>\
             <p>Raffle: <strong>{}</strong><br>Numbers: <strong>{}</strong><br>Total: {}</p>\
             <p>Purchase reference: {}</p>",
            raffle.title,
            numbers_list(purchase),
            purchase.amount,
            purchase.id,
        ),
    }
}

/// Sale email for the raffle creator.
#[must_use]
pub fn creator_sale_email(purchase: &Purchase, raffle: &Raffle) -> EmailMessage {
    EmailMessage {
        to: raffle.creator_email.clone(),
        subject: format!("New sale in {}", raffle.title),
        html: format!(
            "<p>{} bought numbers <strong>{}</strong> for {}.</p>",
            purchase.buyer_email,
            numbers_list(purchase),
            purchase.amount,
        ),
    }
}
