//! Scripted payment gateway.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use raffle_core::gateway::{
    GatewayError, GatewayFuture, GatewayPaymentStatus, PaymentDetails, PaymentGateway,
    PaymentMetadata, Preference, PreferenceRequest,
};
use raffle_core::types::PurchaseId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
struct Script {
    payments: Vec<PaymentDetails>,
    preferences: Vec<PreferenceRequest>,
    preference_failure: Option<GatewayError>,
    payment_failure: Option<GatewayError>,
    delay: Option<Duration>,
}

/// Payment gateway whose payments are set by the test.
///
/// Preferences always succeed unless a failure is injected; payments must be
/// registered with [`set_payment`](Self::set_payment) or one of its shortcuts
/// before they can be fetched. Clones share the same script.
#[derive(Clone, Debug, Default)]
pub struct ScriptedGateway {
    script: Arc<RwLock<Script>>,
    payment_fetches: Arc<AtomicUsize>,
}

impl ScriptedGateway {
    /// Create a gateway with no payments
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a payment.
    pub fn set_payment(&self, payment: PaymentDetails) {
        let mut script = self.script.write().unwrap();
        script.payments.retain(|p| p.external_id != payment.external_id);
        script.payments.push(payment);
    }

    /// Register a payment for a purchase with full metadata.
    pub fn pay(&self, external_id: &str, purchase_id: PurchaseId, status: GatewayPaymentStatus) {
        self.set_payment(PaymentDetails {
            external_id: external_id.to_string(),
            status,
            amount: None,
            metadata: PaymentMetadata {
                purchase_id: Some(purchase_id),
                raffle_id: None,
            },
            external_reference: Some(purchase_id.to_string()),
            preference_id: None,
        });
    }

    /// Register an approved payment for a purchase.
    pub fn approve(&self, external_id: &str, purchase_id: PurchaseId) {
        self.pay(external_id, purchase_id, GatewayPaymentStatus::Approved);
    }

    /// Register a rejected payment for a purchase.
    pub fn reject(&self, external_id: &str, purchase_id: PurchaseId) {
        self.pay(external_id, purchase_id, GatewayPaymentStatus::Rejected);
    }

    /// Make `create_preference` fail with `error`.
    pub fn fail_preferences_with(&self, error: GatewayError) {
        self.script.write().unwrap().preference_failure = Some(error);
    }

    /// Make `get_payment` and `find_payment_by_reference` fail with `error`.
    pub fn fail_payments_with(&self, error: GatewayError) {
        self.script.write().unwrap().payment_failure = Some(error);
    }

    /// Remove injected failures.
    pub fn recover(&self) {
        let mut script = self.script.write().unwrap();
        script.preference_failure = None;
        script.payment_failure = None;
    }

    /// Sleep this long inside every call, widening race windows.
    pub fn set_delay(&self, delay: Duration) {
        self.script.write().unwrap().delay = Some(delay);
    }

    /// Every preference request received, in order.
    #[must_use]
    pub fn preference_requests(&self) -> Vec<PreferenceRequest> {
        self.script.read().unwrap().preferences.clone()
    }

    /// How many times payments were fetched or searched.
    #[must_use]
    pub fn payment_fetches(&self) -> usize {
        self.payment_fetches.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = self.script.read().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl PaymentGateway for ScriptedGateway {
    fn create_preference(&self, request: PreferenceRequest) -> GatewayFuture<'_, Preference> {
        Box::pin(async move {
            self.pause().await;
            let mut script = self.script.write().unwrap();
            if let Some(error) = script.preference_failure.clone() {
                return Err(error);
            }
            script.preferences.push(request);
            let preference_id = format!("pref-{}", script.preferences.len());
            Ok(Preference {
                redirect_url: format!("https://gateway.test/checkout/{preference_id}"),
                preference_id,
            })
        })
    }

    fn get_payment<'a>(&'a self, external_id: &'a str) -> GatewayFuture<'a, PaymentDetails> {
        Box::pin(async move {
            self.pause().await;
            self.payment_fetches.fetch_add(1, Ordering::SeqCst);
            let script = self.script.read().unwrap();
            if let Some(error) = script.payment_failure.clone() {
                return Err(error);
            }
            script
                .payments
                .iter()
                .find(|p| p.external_id == external_id)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(external_id.to_string()))
        })
    }

    fn find_payment_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> GatewayFuture<'a, Option<PaymentDetails>> {
        Box::pin(async move {
            self.pause().await;
            self.payment_fetches.fetch_add(1, Ordering::SeqCst);
            let script = self.script.read().unwrap();
            if let Some(error) = script.payment_failure.clone() {
                return Err(error);
            }
            let matching: Vec<&PaymentDetails> = script
                .payments
                .iter()
                .filter(|p| p.external_reference.as_deref() == Some(reference))
                .collect();
            Ok(matching
                .iter()
                .find(|p| p.status == GatewayPaymentStatus::Approved)
                .or_else(|| matching.last())
                .map(|p| (*p).clone()))
        })
    }
}
