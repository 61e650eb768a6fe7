//! # Raffle Core
//!
//! Ticket reservation and payment reconciliation for numbered-ticket raffles.
//!
//! Buyers pick numbers on a grid, the numbers are held while they pay at an
//! external gateway, and the gateway's asynchronous payment notifications
//! decide whether the tickets become `sold` or go back on sale. Holds that
//! never see a payment are reclaimed by a sweeper.
//!
//! ## Components
//!
//! - [`reservation::ReservationManager`]: claims tickets and opens a payment
//! - [`reconciliation::ReconciliationEngine`]: applies payment outcomes once
//! - [`sweeper::ExpirySweeper`]: expires abandoned holds, repairs orphans
//! - [`notification::NotificationDispatcher`]: at-most-once approval emails
//! - [`raffles::RaffleService`]: raffle lifecycle
//!
//! ## Collaborators
//!
//! Everything outside this crate is a trait injected through constructors:
//! the datastore ([`store::Datastore`]), the payment gateway
//! ([`gateway::PaymentGateway`]), the email channel
//! ([`notification::Notifier`]) and time ([`environment::Clock`]).
//!
//! ## Concurrency
//!
//! The service runs as several stateless instances. No component holds an
//! in-process lock across I/O; every ticket and purchase mutation is a
//! guarded single-row write that fails harmlessly when the row moved on.
//!
//! ## Example
//!
//! ```ignore
//! use raffle_core::reservation::{ReservationManager, ReserveRequest};
//!
//! let manager = ReservationManager::new(store, gateway, clock, config);
//! let reservation = manager
//!     .reserve(ReserveRequest {
//!         raffle_id,
//!         numbers: vec![3, 7],
//!         buyer_email: "buyer@example.com".to_string(),
//!     })
//!     .await?;
//! println!("pay at {}", reservation.redirect_url);
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod notification;
pub mod raffles;
pub mod reconciliation;
pub mod reservation;
pub mod store;
pub mod sweeper;
pub mod types;

pub use error::RaffleError;
