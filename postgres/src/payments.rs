use crate::PgDatastore;
use crate::rows::{db_error, row_to_payment_record, to_i64};
use chrono::{DateTime, Utc};
use raffle_core::gateway::GatewayPaymentStatus;
use raffle_core::store::{PaymentRecordStore, StoreError, StoreFuture};
use raffle_core::types::{PaymentRecord, RecordOutcome};

/// Statuses a stored record never leaves. Must match
/// [`GatewayPaymentStatus::is_terminal`].
const TERMINAL_STATUSES: [GatewayPaymentStatus; 5] = [
    GatewayPaymentStatus::Approved,
    GatewayPaymentStatus::Rejected,
    GatewayPaymentStatus::Cancelled,
    GatewayPaymentStatus::Refunded,
    GatewayPaymentStatus::ChargedBack,
];

fn terminal_statuses() -> Vec<&'static str> {
    TERMINAL_STATUSES.iter().map(GatewayPaymentStatus::as_str).collect()
}

impl PaymentRecordStore for PgDatastore {
    fn upsert_payment_record<'a>(
        &'a self,
        record: &'a PaymentRecord,
    ) -> StoreFuture<'a, RecordOutcome> {
        Box::pin(async move {
            let amount = record.amount.map(to_i64).transpose()?;

            // The conditional DO UPDATE skips terminal rows and then returns
            // nothing; xmax = 0 only on a freshly inserted tuple.
            let inserted: Option<bool> = sqlx::query_scalar(
                r"
                INSERT INTO payment_records (external_id, status, amount_cents, purchase_id, attempts, updated_at)
                VALUES ($1, $2, $3, $4, 1, $5)
                ON CONFLICT (external_id) DO UPDATE SET
                    status = EXCLUDED.status,
                    amount_cents = COALESCE(EXCLUDED.amount_cents, payment_records.amount_cents),
                    purchase_id = COALESCE(EXCLUDED.purchase_id, payment_records.purchase_id),
                    attempts = payment_records.attempts + 1,
                    updated_at = EXCLUDED.updated_at
                WHERE payment_records.status <> ALL($6)
                RETURNING (xmax = 0)
                ",
            )
            .bind(&record.external_id)
            .bind(record.status.as_str())
            .bind(amount)
            .bind(record.purchase_id.map(|id| *id.as_uuid()))
            .bind(record.updated_at)
            .bind(terminal_statuses())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            match inserted {
                Some(true) => Ok(RecordOutcome::Inserted),
                Some(false) => Ok(RecordOutcome::Updated),
                None => {
                    let status: String = sqlx::query_scalar(
                        "SELECT status FROM payment_records WHERE external_id = $1",
                    )
                    .bind(&record.external_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error)?;

                    let status = GatewayPaymentStatus::parse(&status);
                    if !status.is_terminal() {
                        return Err(StoreError::Corrupt(format!(
                            "Payment record {} skipped with non-terminal status {}",
                            record.external_id,
                            status.as_str()
                        )));
                    }
                    Ok(RecordOutcome::AlreadyTerminal(status))
                }
            }
        })
    }

    fn get_payment_record<'a>(
        &'a self,
        external_id: &'a str,
    ) -> StoreFuture<'a, Option<PaymentRecord>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT external_id, status, amount_cents, purchase_id, attempts, updated_at
                FROM payment_records
                WHERE external_id = $1
                ",
            )
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(row_to_payment_record).transpose()
        })
    }

    fn list_unresolved_payments(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
        limit: u32,
    ) -> StoreFuture<'_, Vec<PaymentRecord>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT external_id, status, amount_cents, purchase_id, attempts, updated_at
                FROM payment_records
                WHERE status <> ALL($1)
                  AND updated_at < $2
                  AND attempts < $3
                ORDER BY updated_at
                LIMIT $4
                ",
            )
            .bind(terminal_statuses())
            .bind(older_than)
            .bind(i64::from(max_attempts))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(row_to_payment_record).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_match_domain() {
        let all = [
            GatewayPaymentStatus::Approved,
            GatewayPaymentStatus::Authorized,
            GatewayPaymentStatus::Pending,
            GatewayPaymentStatus::InProcess,
            GatewayPaymentStatus::InMediation,
            GatewayPaymentStatus::Rejected,
            GatewayPaymentStatus::Cancelled,
            GatewayPaymentStatus::Refunded,
            GatewayPaymentStatus::ChargedBack,
            GatewayPaymentStatus::Unknown,
        ];
        for status in all {
            assert_eq!(
                TERMINAL_STATUSES.contains(&status),
                status.is_terminal(),
                "{status:?}"
            );
        }
    }
}
