//! Prometheus exporter for the checkout metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `raffle_reservations_total{outcome}`: checkout attempts by outcome
//! - `raffle_reconciliations_total{outcome}`: reconciliation outcomes
//! - `raffle_swept_purchases_total`: purchases expired by the sweeper
//! - `raffle_late_approvals_total`: approvals for already-ended purchases
//! - `raffle_emails_sent_total{kind}`: approval emails delivered
//!
//! ## Histograms
//! - `raffle_sweep_duration_seconds`: time taken by one scheduler tick

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;

/// Register every metric description.
pub fn register_metrics() {
    describe_counter!(
        "raffle_reservations_total",
        "Checkout attempts by outcome (reserved, unavailable, gateway_error, ...)"
    );
    describe_counter!(
        "raffle_reconciliations_total",
        "Payment reconciliations by outcome"
    );
    describe_counter!(
        "raffle_swept_purchases_total",
        "Purchases expired by the sweeper"
    );
    describe_counter!(
        "raffle_late_approvals_total",
        "Approved payments that arrived after their purchase ended"
    );
    describe_counter!(
        "raffle_emails_sent_total",
        "Approval emails delivered, by recipient kind"
    );
    describe_histogram!(
        "raffle_sweep_duration_seconds",
        "Time taken by one sweep and stale-payment pass"
    );
}

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns error if the recorder is already installed or the listener
/// cannot be set up.
pub fn install(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )?
        .install()?;

    register_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}
