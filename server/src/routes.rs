//! Router configuration.

use crate::api::{admin, checkout, purchases, raffles, webhooks};
use crate::health::{health_check, readiness_check};
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Build the complete router.
///
/// Requests get an `x-request-id` (kept when the caller sent one) that is
/// echoed on the response and recorded in the trace span.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/reconcile", post(admin::reconcile))
        .route("/sweep", post(admin::sweep))
        .route("/raffles", post(admin::create_raffle))
        .route("/raffles/:id", delete(admin::delete_raffle))
        .route("/raffles/:id/activate", post(admin::activate_raffle))
        .route("/raffles/:id/close", post(admin::close_raffle));

    let api_routes = Router::new()
        .route("/checkout", post(checkout::create_checkout))
        .route("/webhooks/payments", post(webhooks::payment_notification))
        .route("/purchases/:id/status", get(purchases::get_purchase_status))
        .route("/raffles/:id/tickets", get(raffles::get_ticket_grid))
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
