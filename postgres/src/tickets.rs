use crate::PgDatastore;
use crate::rows::{db_error, row_to_ticket, to_i32};
use chrono::{DateTime, Utc};
use raffle_core::store::{StoreError, StoreFuture, TicketStore};
use raffle_core::types::{RaffleId, Ticket, TicketCounts, TicketTransition};

fn count(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("Invalid ticket count: {value}")))
}

impl TicketStore for PgDatastore {
    fn list_tickets(&self, raffle_id: RaffleId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT raffle_id, number, status, purchase_id, hold_expires_at
                FROM tickets
                WHERE raffle_id = $1
                ORDER BY number
                ",
            )
            .bind(*raffle_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(row_to_ticket).collect()
        })
    }

    fn get_tickets<'a>(
        &'a self,
        raffle_id: RaffleId,
        numbers: &'a [u32],
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            let numbers = numbers
                .iter()
                .map(|n| to_i32(*n))
                .collect::<Result<Vec<i32>, _>>()?;

            let rows = sqlx::query(
                r"
                SELECT raffle_id, number, status, purchase_id, hold_expires_at
                FROM tickets
                WHERE raffle_id = $1 AND number = ANY($2)
                ORDER BY number
                ",
            )
            .bind(*raffle_id.as_uuid())
            .bind(&numbers)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(row_to_ticket).collect()
        })
    }

    fn try_transition(
        &self,
        raffle_id: RaffleId,
        number: u32,
        transition: TicketTransition,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let number = to_i32(number)?;
            let query = match transition {
                TicketTransition::Hold {
                    purchase_id,
                    hold_expires_at,
                } => sqlx::query(
                    r"
                    UPDATE tickets
                    SET status = 'pending', purchase_id = $3, hold_expires_at = $4
                    WHERE raffle_id = $1 AND number = $2 AND status = 'available'
                    ",
                )
                .bind(*raffle_id.as_uuid())
                .bind(number)
                .bind(*purchase_id.as_uuid())
                .bind(hold_expires_at),
                TicketTransition::Release { purchase_id } => sqlx::query(
                    r"
                    UPDATE tickets
                    SET status = 'available', purchase_id = NULL, hold_expires_at = NULL
                    WHERE raffle_id = $1 AND number = $2 AND status = 'pending' AND purchase_id = $3
                    ",
                )
                .bind(*raffle_id.as_uuid())
                .bind(number)
                .bind(*purchase_id.as_uuid()),
                TicketTransition::Sell { purchase_id } => sqlx::query(
                    r"
                    UPDATE tickets
                    SET status = 'sold', hold_expires_at = NULL
                    WHERE raffle_id = $1 AND number = $2 AND status = 'pending' AND purchase_id = $3
                    ",
                )
                .bind(*raffle_id.as_uuid())
                .bind(number)
                .bind(*purchase_id.as_uuid()),
            };

            let result = query.execute(&self.pool).await.map_err(db_error)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn list_expired_holds(
        &self,
        cutoff: DateTime<Utc>,
        raffle_id: Option<RaffleId>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT raffle_id, number, status, purchase_id, hold_expires_at
                FROM tickets
                WHERE status = 'pending'
                  AND hold_expires_at < $1
                  AND ($2::uuid IS NULL OR raffle_id = $2)
                ORDER BY hold_expires_at, raffle_id, number
                LIMIT $3
                ",
            )
            .bind(cutoff)
            .bind(raffle_id.map(|id| *id.as_uuid()))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(row_to_ticket).collect()
        })
    }

    fn ticket_counts(&self, raffle_id: RaffleId) -> StoreFuture<'_, TicketCounts> {
        Box::pin(async move {
            let (available, pending, sold): (i64, i64, i64) = sqlx::query_as(
                r"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'available'),
                    COUNT(*) FILTER (WHERE status = 'pending'),
                    COUNT(*) FILTER (WHERE status = 'sold')
                FROM tickets
                WHERE raffle_id = $1
                ",
            )
            .bind(*raffle_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(TicketCounts {
                available: count(available)?,
                pending: count(pending)?,
                sold: count(sold)?,
            })
        })
    }
}
