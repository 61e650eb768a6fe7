//! Raffle lifecycle: creation with bulk tickets, activation, closing and
//! deletion.

use crate::environment::Clock;
use crate::error::RaffleError;
use crate::reservation::is_plausible_email;
use crate::store::Datastore;
use crate::types::{Money, Raffle, RaffleId, RaffleStatus, Ticket, TicketCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest raffle that can be created.
pub const MAX_TICKETS: u32 = 100_000;

/// Input for [`RaffleService::create_raffle`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRaffle {
    /// Display title
    pub title: String,
    /// Price per ticket
    pub unit_price: Money,
    /// Number of tickets
    pub total_tickets: u32,
    /// End of sales
    pub ends_at: DateTime<Utc>,
    /// Creator contact
    pub creator_email: String,
}

/// How a raffle was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Raffle and tickets were physically deleted
    Removed,
    /// Tickets were held or sold; the raffle was marked `deleted`
    Archived,
}

/// Every ticket of a raffle with its counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrid {
    /// The raffle
    pub raffle: Raffle,
    /// Tickets ordered by number
    pub tickets: Vec<Ticket>,
    /// Counts per status
    pub counts: TicketCounts,
}

/// Raffle administration.
#[derive(Clone)]
pub struct RaffleService {
    store: Arc<dyn Datastore>,
    clock: Arc<dyn Clock>,
}

impl RaffleService {
    /// Create a raffle service.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a `draft` raffle and its tickets `1..=total_tickets`.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty title, zero price, bad ticket count, end in the
    ///   past, bad email
    /// - `Fatal`: datastore failure
    #[tracing::instrument(skip_all, fields(title = %input.title, total_tickets = input.total_tickets))]
    pub async fn create_raffle(&self, input: NewRaffle) -> Result<Raffle, RaffleError> {
        let now = self.clock.now();

        let title = input.title.trim();
        if title.is_empty() {
            return Err(RaffleError::Validation("title must not be empty".to_string()));
        }
        if input.unit_price.cents() == 0 {
            return Err(RaffleError::Validation("unit price must be positive".to_string()));
        }
        if input.total_tickets == 0 || input.total_tickets > MAX_TICKETS {
            return Err(RaffleError::Validation(format!(
                "total tickets must be between 1 and {MAX_TICKETS}"
            )));
        }
        if input.ends_at <= now {
            return Err(RaffleError::Validation("end date must be in the future".to_string()));
        }
        if !is_plausible_email(&input.creator_email) {
            return Err(RaffleError::Validation("creator email is invalid".to_string()));
        }

        let raffle = Raffle {
            id: RaffleId::new(),
            title: title.to_string(),
            unit_price: input.unit_price,
            total_tickets: input.total_tickets,
            status: RaffleStatus::Draft,
            ends_at: input.ends_at,
            creator_email: input.creator_email.trim().to_string(),
            created_at: now,
        };
        self.store.create_raffle(&raffle).await?;

        tracing::info!(raffle_id = %raffle.id, "Raffle created");
        Ok(raffle)
    }

    /// Load a raffle.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound` or `Fatal`.
    pub async fn get_raffle(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        self.store
            .get_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))
    }

    /// The raffle's ticket grid.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound` or `Fatal`.
    pub async fn ticket_grid(&self, raffle_id: RaffleId) -> Result<TicketGrid, RaffleError> {
        let raffle = self.get_raffle(raffle_id).await?;
        let tickets = self.store.list_tickets(raffle_id).await?;
        let counts = self.store.ticket_counts(raffle_id).await?;
        Ok(TicketGrid {
            raffle,
            tickets,
            counts,
        })
    }

    /// Open a draft raffle for sale.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound`, `Validation` if it is not a draft, or `Fatal`.
    pub async fn activate(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        self.change_status(raffle_id, &[RaffleStatus::Draft], RaffleStatus::Active)
            .await
    }

    /// Stop sales. Open purchases still settle or expire normally.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound`, `Validation` if it is not active, or `Fatal`.
    pub async fn close(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        self.change_status(raffle_id, &[RaffleStatus::Active], RaffleStatus::Closed)
            .await
    }

    /// Delete a raffle. Physical only while no ticket was ever held or sold.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound` or `Fatal`.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, raffle_id: RaffleId) -> Result<DeleteOutcome, RaffleError> {
        let raffle = self.get_raffle(raffle_id).await?;
        if raffle.status == RaffleStatus::Deleted {
            return Ok(DeleteOutcome::Archived);
        }

        if self.store.delete_unsold_raffle(raffle_id).await? {
            tracing::info!("Raffle removed");
            return Ok(DeleteOutcome::Removed);
        }

        self.store
            .update_raffle_status(
                raffle_id,
                &[RaffleStatus::Draft, RaffleStatus::Active, RaffleStatus::Closed],
                RaffleStatus::Deleted,
            )
            .await?;
        tracing::info!("Raffle archived");
        Ok(DeleteOutcome::Archived)
    }

    async fn change_status(
        &self,
        raffle_id: RaffleId,
        from: &[RaffleStatus],
        to: RaffleStatus,
    ) -> Result<Raffle, RaffleError> {
        if self.store.update_raffle_status(raffle_id, from, to).await? {
            tracing::info!(raffle_id = %raffle_id, status = to.as_str(), "Raffle status changed");
            return self.get_raffle(raffle_id).await;
        }

        let raffle = self.get_raffle(raffle_id).await?;
        if raffle.status == to {
            return Ok(raffle);
        }
        Err(RaffleError::Validation(format!(
            "cannot move raffle from {} to {}",
            raffle.status.as_str(),
            to.as_str()
        )))
    }
}
