//! Wired-up services over the in-memory doubles.

#![allow(clippy::expect_used)] // Fixtures fail the test on setup errors
#![allow(clippy::missing_panics_doc)]

use crate::{InMemoryDatastore, ManualClock, RecordingNotifier, ScriptedGateway, test_clock};
use chrono::Duration;
use raffle_core::config::{ReservationConfig, SweeperConfig};
use raffle_core::environment::Clock;
use raffle_core::error::RaffleError;
use raffle_core::notification::NotificationDispatcher;
use raffle_core::raffles::{NewRaffle, RaffleService};
use raffle_core::reconciliation::ReconciliationEngine;
use raffle_core::reservation::{Reservation, ReservationManager, ReserveRequest};
use raffle_core::sweeper::ExpirySweeper;
use raffle_core::types::{Money, Raffle, RaffleId};
use std::sync::Arc;

/// Buyer address used by [`Harness::reserve`].
pub const BUYER: &str = "buyer@example.com";

/// Creator address used by [`Harness::active_raffle`].
pub const CREATOR: &str = "creator@example.com";

/// Every service wired to shared in-memory doubles.
///
/// The doubles are public so tests can script the gateway, inspect the
/// tables and move the clock.
#[derive(Clone)]
pub struct Harness {
    /// Shared tables
    pub store: InMemoryDatastore,
    /// Scripted gateway
    pub gateway: ScriptedGateway,
    /// Captured emails
    pub notifier: RecordingNotifier,
    /// Test-controlled time
    pub clock: ManualClock,
    /// Raffle lifecycle
    pub raffles: RaffleService,
    /// Reservations
    pub reservations: ReservationManager,
    /// Reconciliation
    pub engine: ReconciliationEngine,
    /// Expiry sweeper
    pub sweeper: ExpirySweeper,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Harness with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ReservationConfig::default(), SweeperConfig::default())
    }

    /// Harness with explicit configuration.
    #[must_use]
    pub fn with_config(reservation: ReservationConfig, sweeper: SweeperConfig) -> Self {
        let store = InMemoryDatastore::new();
        let gateway = ScriptedGateway::new();
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::new(test_clock().now());

        let shared_store = Arc::new(store.clone());
        let shared_gateway = Arc::new(gateway.clone());
        let shared_clock = Arc::new(clock.clone());

        let notifications =
            NotificationDispatcher::new(shared_store.clone(), Arc::new(notifier.clone()));
        let engine = ReconciliationEngine::new(
            shared_store.clone(),
            shared_gateway.clone(),
            notifications,
            shared_clock.clone(),
        );

        Self {
            raffles: RaffleService::new(shared_store.clone(), shared_clock.clone()),
            reservations: ReservationManager::new(
                shared_store.clone(),
                shared_gateway,
                shared_clock.clone(),
                reservation,
            ),
            sweeper: ExpirySweeper::new(shared_store, engine.clone(), shared_clock, sweeper),
            engine,
            store,
            gateway,
            notifier,
            clock,
        }
    }

    /// Create and activate a raffle with `total` tickets.
    pub async fn active_raffle(&self, total: u32, unit_price_cents: u64) -> Raffle {
        let raffle = self
            .raffles
            .create_raffle(NewRaffle {
                title: "Test raffle".to_string(),
                unit_price: Money::from_cents(unit_price_cents),
                total_tickets: total,
                ends_at: self.clock.now() + Duration::days(30),
                creator_email: CREATOR.to_string(),
            })
            .await
            .expect("raffle should be created");
        self.raffles
            .activate(raffle.id)
            .await
            .expect("raffle should activate")
    }

    /// Reserve `numbers` for [`BUYER`].
    ///
    /// # Errors
    ///
    /// Whatever the reservation returns.
    pub async fn reserve(
        &self,
        raffle_id: RaffleId,
        numbers: Vec<u32>,
    ) -> Result<Reservation, RaffleError> {
        self.reservations
            .reserve(ReserveRequest {
                raffle_id,
                numbers,
                buyer_email: BUYER.to_string(),
            })
            .await
    }
}
