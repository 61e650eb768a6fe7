//! Application state shared across handlers.

use raffle_core::config::{ReservationConfig, SweeperConfig};
use raffle_core::environment::Clock;
use raffle_core::gateway::PaymentGateway;
use raffle_core::notification::{NotificationDispatcher, Notifier};
use raffle_core::raffles::RaffleService;
use raffle_core::reconciliation::ReconciliationEngine;
use raffle_core::reservation::ReservationManager;
use raffle_core::store::Datastore;
use raffle_core::sweeper::ExpirySweeper;
use std::sync::Arc;

/// Shared secrets guarding the webhook and admin endpoints.
#[derive(Clone, Debug, Default)]
pub struct Security {
    /// Webhook signing secret; signatures are not checked when unset
    pub webhook_secret: Option<String>,
    /// Operator bearer token; admin endpoints are closed when unset
    pub operator_token: Option<String>,
}

/// Services and collaborators handlers need.
///
/// Every field is cheap to clone; the services share their collaborators
/// through `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Datastore, for readiness and purchase lookups
    pub store: Arc<dyn Datastore>,
    /// Raffle lifecycle
    pub raffles: RaffleService,
    /// Checkout
    pub reservations: ReservationManager,
    /// Payment reconciliation
    pub engine: ReconciliationEngine,
    /// Expiry sweeper
    pub sweeper: ExpirySweeper,
    /// Shared secrets
    pub security: Arc<Security>,
    /// Time source, for webhook signature freshness
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire every service over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        reservation: ReservationConfig,
        sweeper: SweeperConfig,
        security: Security,
    ) -> Self {
        let notifications = NotificationDispatcher::new(store.clone(), notifier);
        let engine =
            ReconciliationEngine::new(store.clone(), gateway.clone(), notifications, clock.clone());

        Self {
            raffles: RaffleService::new(store.clone(), clock.clone()),
            reservations: ReservationManager::new(store.clone(), gateway, clock.clone(), reservation),
            sweeper: ExpirySweeper::new(store.clone(), engine.clone(), clock.clone(), sweeper),
            engine,
            store,
            security: Arc::new(security),
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }
}
