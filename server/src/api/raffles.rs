//! `GET /api/raffles/:id/tickets`: the public ticket grid.

use super::parse_id;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use raffle_core::types::{RaffleId, RaffleStatus, TicketCounts, TicketStatus};
use serde::{Deserialize, Serialize};

/// A raffle as buyers see it.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicRaffle {
    /// Raffle id
    pub id: RaffleId,
    /// Title
    pub title: String,
    /// Ticket price in cents
    pub unit_price_cents: u64,
    /// Number of tickets
    pub total_tickets: u32,
    /// Lifecycle status
    pub status: RaffleStatus,
    /// End of sales
    pub ends_at: DateTime<Utc>,
}

/// One cell of the grid.
#[derive(Debug, Serialize, Deserialize)]
pub struct GridCell {
    /// Ticket number
    pub number: u32,
    /// `available`, `pending` or `sold`
    pub status: TicketStatus,
}

/// Grid response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TicketGridResponse {
    /// The raffle
    pub raffle: PublicRaffle,
    /// Every ticket, by number
    pub tickets: Vec<GridCell>,
    /// Counts per status
    pub counts: TicketCounts,
}

/// Every ticket of a raffle with its status.
///
/// Purchase ids and the creator's contact are not exposed.
///
/// # Errors
///
/// - 422 for a malformed id
/// - 404 `raffle_not_found`
pub async fn get_ticket_grid(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TicketGridResponse>, AppError> {
    let raffle_id: RaffleId = parse_id(&id, "raffle")?;
    let grid = state.raffles.ticket_grid(raffle_id).await?;

    Ok(Json(TicketGridResponse {
        raffle: PublicRaffle {
            id: grid.raffle.id,
            title: grid.raffle.title,
            unit_price_cents: grid.raffle.unit_price.cents(),
            total_tickets: grid.raffle.total_tickets,
            status: grid.raffle.status,
            ends_at: grid.raffle.ends_at,
        },
        tickets: grid
            .tickets
            .into_iter()
            .map(|t| GridCell {
                number: t.number,
                status: t.status,
            })
            .collect(),
        counts: grid.counts,
    }))
}
