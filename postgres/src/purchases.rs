use crate::PgDatastore;
use crate::rows::{db_error, row_to_purchase, to_i32, to_i64};
use chrono::{DateTime, Utc};
use raffle_core::store::{PurchaseLedger, StoreFuture};
use raffle_core::types::{NotificationKind, Purchase, PurchaseId, PurchaseStatus, RaffleId};

const PURCHASE_COLUMNS: &str = "id, raffle_id, numbers, buyer_email, amount_cents, status, \
     preference_id, payment_id, hold_expires_at, emailed_buyer, emailed_creator, \
     created_at, updated_at";

const fn marker_column(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Buyer => "emailed_buyer",
        NotificationKind::Creator => "emailed_creator",
    }
}

impl PurchaseLedger for PgDatastore {
    fn insert_purchase<'a>(&'a self, purchase: &'a Purchase) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let numbers = purchase
                .numbers
                .iter()
                .map(|n| to_i32(*n))
                .collect::<Result<Vec<i32>, _>>()?;

            sqlx::query(
                r"
                INSERT INTO purchases
                    (id, raffle_id, numbers, buyer_email, amount_cents, status, preference_id,
                     payment_id, hold_expires_at, emailed_buyer, emailed_creator, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ",
            )
            .bind(*purchase.id.as_uuid())
            .bind(*purchase.raffle_id.as_uuid())
            .bind(&numbers)
            .bind(&purchase.buyer_email)
            .bind(to_i64(purchase.amount)?)
            .bind(purchase.status.as_str())
            .bind(purchase.preference_id.as_deref())
            .bind(purchase.payment_id.as_deref())
            .bind(purchase.hold_expires_at)
            .bind(purchase.emailed_buyer)
            .bind(purchase.emailed_creator)
            .bind(purchase.created_at)
            .bind(purchase.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(())
        })
    }

    fn get_purchase(&self, purchase_id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(async move {
            let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1");
            let row = sqlx::query(&sql)
                .bind(*purchase_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            row.as_ref().map(row_to_purchase).transpose()
        })
    }

    fn find_purchase_by_preference<'a>(
        &'a self,
        preference_id: &'a str,
    ) -> StoreFuture<'a, Option<Purchase>> {
        Box::pin(async move {
            let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE preference_id = $1");
            let row = sqlx::query(&sql)
                .bind(preference_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            row.as_ref().map(row_to_purchase).transpose()
        })
    }

    fn transition_purchase<'a>(
        &'a self,
        purchase_id: PurchaseId,
        from: &'a [PurchaseStatus],
        to: PurchaseStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let from: Vec<&str> = from.iter().map(PurchaseStatus::as_str).collect();
            let result = sqlx::query(
                r"
                UPDATE purchases
                SET status = $3, updated_at = NOW()
                WHERE id = $1 AND status = ANY($2)
                ",
            )
            .bind(*purchase_id.as_uuid())
            .bind(&from)
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn attach_preference<'a>(
        &'a self,
        purchase_id: PurchaseId,
        preference_id: &'a str,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE purchases
                SET preference_id = $2, status = 'pending_payment', updated_at = NOW()
                WHERE id = $1 AND status = 'initiated'
                ",
            )
            .bind(*purchase_id.as_uuid())
            .bind(preference_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn set_payment_id<'a>(
        &'a self,
        purchase_id: PurchaseId,
        payment_id: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE purchases SET payment_id = $2 WHERE id = $1")
                .bind(*purchase_id.as_uuid())
                .bind(payment_id)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn list_expired_purchases(
        &self,
        cutoff: DateTime<Utc>,
        raffle_id: Option<RaffleId>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Purchase>> {
        Box::pin(async move {
            let sql = format!(
                r"
                SELECT {PURCHASE_COLUMNS}
                FROM purchases
                WHERE status IN ('initiated', 'pending_payment')
                  AND hold_expires_at < $1
                  AND ($2::uuid IS NULL OR raffle_id = $2)
                ORDER BY hold_expires_at
                LIMIT $3
                "
            );
            let rows = sqlx::query(&sql)
                .bind(cutoff)
                .bind(raffle_id.map(|id| *id.as_uuid()))
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

            rows.iter().map(row_to_purchase).collect()
        })
    }

    fn claim_notification(
        &self,
        purchase_id: PurchaseId,
        kind: NotificationKind,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let column = marker_column(kind);
            let sql = format!(
                "UPDATE purchases SET {column} = TRUE WHERE id = $1 AND {column} = FALSE"
            );
            let result = sqlx::query(&sql)
                .bind(*purchase_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn release_notification(
        &self,
        purchase_id: PurchaseId,
        kind: NotificationKind,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let sql = format!("UPDATE purchases SET {} = FALSE WHERE id = $1", marker_column(kind));
            sqlx::query(&sql)
                .bind(*purchase_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}
