//! HTTP surface of the raffle checkout service.
//!
//! - `POST /api/checkout`: reserve numbers and get the gateway redirect
//! - `POST /api/webhooks/payments`: gateway payment notifications
//! - `GET /api/purchases/:id/status`: buyer-facing purchase status
//! - `GET /api/raffles/:id/tickets`: the ticket grid
//! - `/api/admin/*`: operator endpoints (bearer token)
//! - `GET /health`, `GET /ready`
//!
//! The binary also runs the [`scheduler`], which sweeps expired holds and
//! retries deferred payment notifications on an interval.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod signature;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
