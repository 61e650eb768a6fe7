use crate::PgDatastore;
use crate::rows::{db_error, row_to_raffle, to_i32, to_i64};
use raffle_core::store::{RaffleStore, StoreFuture};
use raffle_core::types::{Raffle, RaffleId, RaffleStatus};

impl RaffleStore for PgDatastore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn create_raffle<'a>(&'a self, raffle: &'a Raffle) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error)?;

            sqlx::query(
                r"
                INSERT INTO raffles
                    (id, title, unit_price_cents, total_tickets, status, ends_at, creator_email, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(*raffle.id.as_uuid())
            .bind(&raffle.title)
            .bind(to_i64(raffle.unit_price)?)
            .bind(to_i32(raffle.total_tickets)?)
            .bind(raffle.status.as_str())
            .bind(raffle.ends_at)
            .bind(&raffle.creator_email)
            .bind(raffle.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            sqlx::query(
                r"
                INSERT INTO tickets (raffle_id, number)
                SELECT $1, generate_series(1, $2)
                ",
            )
            .bind(*raffle.id.as_uuid())
            .bind(to_i32(raffle.total_tickets)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            tx.commit().await.map_err(db_error)?;

            tracing::info!(
                raffle_id = %raffle.id,
                total_tickets = raffle.total_tickets,
                "Raffle stored"
            );
            Ok(())
        })
    }

    fn get_raffle(&self, raffle_id: RaffleId) -> StoreFuture<'_, Option<Raffle>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, title, unit_price_cents, total_tickets, status, ends_at,
                       creator_email, created_at
                FROM raffles
                WHERE id = $1
                ",
            )
            .bind(*raffle_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(row_to_raffle).transpose()
        })
    }

    fn update_raffle_status<'a>(
        &'a self,
        raffle_id: RaffleId,
        from: &'a [RaffleStatus],
        to: RaffleStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let from: Vec<&str> = from.iter().map(RaffleStatus::as_str).collect();
            let result = sqlx::query("UPDATE raffles SET status = $3 WHERE id = $1 AND status = ANY($2)")
                .bind(*raffle_id.as_uuid())
                .bind(&from)
                .bind(to.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn delete_unsold_raffle(&self, raffle_id: RaffleId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            // Tickets and purchases go with the raffle through ON DELETE CASCADE.
            let result = sqlx::query(
                r"
                DELETE FROM raffles
                WHERE id = $1
                  AND NOT EXISTS (
                      SELECT 1 FROM tickets WHERE raffle_id = $1 AND status <> 'available'
                  )
                ",
            )
            .bind(*raffle_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            let deleted = result.rows_affected() == 1;
            if deleted {
                tracing::info!(raffle_id = %raffle_id, "Raffle deleted");
            }
            Ok(deleted)
        })
    }
}
