//! `PostgreSQL` datastore for raffle checkout.
//!
//! Implements the four storage traits from `raffle-core` over a single
//! `sqlx` connection pool:
//!
//! - `raffles`: raffle definitions
//! - `tickets`: one row per `(raffle_id, number)`
//! - `purchases`: checkout attempts and their notification markers
//! - `payment_records`: the reconciliation log keyed by gateway payment id
//!
//! Every guarded write is a single `UPDATE ... WHERE <expected state>`; the
//! affected row count tells the caller whether it won. Row-level atomicity is
//! all the service relies on, so the store is safe to share between any
//! number of service instances.
//!
//! # Example
//!
//! ```ignore
//! use raffle_postgres::PgDatastore;
//!
//! let store = PgDatastore::connect("postgres://localhost/raffles", 10).await?;
//! store.migrate().await?;
//! ```

mod payments;
mod purchases;
mod raffles;
mod rows;
mod tickets;

use raffle_core::store::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// `PostgreSQL`-backed [`Datastore`](raffle_core::store::Datastore).
#[derive(Clone, Debug)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
