//! Row decoding and column conversions.

use chrono::{DateTime, Utc};
use raffle_core::gateway::GatewayPaymentStatus;
use raffle_core::store::StoreError;
use raffle_core::types::{
    Money, PaymentRecord, Purchase, PurchaseId, PurchaseStatus, Raffle, RaffleId, RaffleStatus,
    Ticket, TicketStatus,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

/// Map a query failure, keeping unique violations distinguishable.
pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Duplicate(db.message().to_string());
        }
    }
    StoreError::Database(e.to_string())
}

fn corrupt(e: sqlx::Error) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

pub(crate) fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{value} exceeds INTEGER")))
}

pub(crate) fn to_i64(cents: Money) -> Result<i64, StoreError> {
    i64::try_from(cents.cents())
        .map_err(|_| StoreError::Corrupt(format!("{cents} exceeds BIGINT")))
}

fn to_u32(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative value {value}")))
}

fn to_money(cents: i64) -> Result<Money, StoreError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Corrupt(format!("negative amount {cents}")))
}

pub(crate) fn row_to_raffle(row: &PgRow) -> Result<Raffle, StoreError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    Ok(Raffle {
        id: RaffleId::from_uuid(row.try_get("id").map_err(corrupt)?),
        title: row.try_get("title").map_err(corrupt)?,
        unit_price: to_money(row.try_get("unit_price_cents").map_err(corrupt)?)?,
        total_tickets: to_u32(row.try_get("total_tickets").map_err(corrupt)?)?,
        status: RaffleStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid raffle status: {status}")))?,
        ends_at: row.try_get("ends_at").map_err(corrupt)?,
        creator_email: row.try_get("creator_email").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

pub(crate) fn row_to_ticket(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let purchase_id: Option<Uuid> = row.try_get("purchase_id").map_err(corrupt)?;
    Ok(Ticket {
        raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(corrupt)?),
        number: to_u32(row.try_get("number").map_err(corrupt)?)?,
        status: TicketStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid ticket status: {status}")))?,
        purchase_id: purchase_id.map(PurchaseId::from_uuid),
        hold_expires_at: row.try_get("hold_expires_at").map_err(corrupt)?,
    })
}

pub(crate) fn row_to_purchase(row: &PgRow) -> Result<Purchase, StoreError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let numbers: Vec<i32> = row.try_get("numbers").map_err(corrupt)?;
    Ok(Purchase {
        id: PurchaseId::from_uuid(row.try_get("id").map_err(corrupt)?),
        raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(corrupt)?),
        numbers: numbers.into_iter().map(to_u32).collect::<Result<_, _>>()?,
        buyer_email: row.try_get("buyer_email").map_err(corrupt)?,
        amount: to_money(row.try_get("amount_cents").map_err(corrupt)?)?,
        status: PurchaseStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid purchase status: {status}")))?,
        preference_id: row.try_get("preference_id").map_err(corrupt)?,
        payment_id: row.try_get("payment_id").map_err(corrupt)?,
        hold_expires_at: row.try_get("hold_expires_at").map_err(corrupt)?,
        emailed_buyer: row.try_get("emailed_buyer").map_err(corrupt)?,
        emailed_creator: row.try_get("emailed_creator").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

pub(crate) fn row_to_payment_record(row: &PgRow) -> Result<PaymentRecord, StoreError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let amount: Option<i64> = row.try_get("amount_cents").map_err(corrupt)?;
    let purchase_id: Option<Uuid> = row.try_get("purchase_id").map_err(corrupt)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(corrupt)?;
    Ok(PaymentRecord {
        external_id: row.try_get("external_id").map_err(corrupt)?,
        status: GatewayPaymentStatus::parse(&status),
        amount: amount.map(to_money).transpose()?,
        purchase_id: purchase_id.map(PurchaseId::from_uuid),
        attempts: to_u32(row.try_get("attempts").map_err(corrupt)?)?,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(to_i32(100_000), Ok(100_000));
        assert!(matches!(to_i32(u32::MAX), Err(StoreError::Corrupt(_))));
        assert_eq!(to_i64(Money::from_cents(1250)), Ok(1250));
        assert!(to_i64(Money::from_cents(u64::MAX)).is_err());
        assert_eq!(to_money(42), Ok(Money::from_cents(42)));
        assert!(to_money(-1).is_err());
        assert!(to_u32(-5).is_err());
    }
}
