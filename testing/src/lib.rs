//! # Raffle Testing
//!
//! Test doubles for the raffle checkout services.
//!
//! This crate provides:
//! - [`InMemoryDatastore`]: every table behind one lock, with failure injection
//! - [`ScriptedGateway`]: payment gateway whose payments are set by the test
//! - [`RecordingNotifier`]: captures sent emails
//! - [`FixedClock`] / [`ManualClock`]: deterministic time
//! - [`fixtures`]: ready-made raffles and wired-up services
//!
//! ## Example
//!
//! ```ignore
//! use raffle_testing::fixtures::Harness;
//!
//! #[tokio::test]
//! async fn test_checkout() {
//!     let h = Harness::new();
//!     let raffle = h.active_raffle(10, 500).await;
//!     let reservation = h.reserve(raffle.id, vec![3, 7]).await.unwrap();
//!     h.gateway.approve("pay-1", reservation.purchase_id);
//!     h.engine.reconcile_payment("pay-1").await.unwrap();
//! }
//! ```

pub mod datastore;
pub mod fixtures;
pub mod gateway;
pub mod notifier;

use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)]

    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when the test advances it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the services under test.
    ///
    /// ```
    /// use raffle_testing::mocks::{ManualClock, test_clock};
    /// use raffle_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::new(test_clock().now());
    /// let start = clock.now();
    /// clock.advance(Duration::minutes(16));
    /// assert_eq!(clock.now() - start, Duration::minutes(16));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move time forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use datastore::InMemoryDatastore;
pub use gateway::ScriptedGateway;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use notifier::RecordingNotifier;
