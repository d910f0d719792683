//! `PostgreSQL` storage for the account read model.
//!
//! ```sql
//! CREATE TABLE account_projections (
//!     email TEXT PRIMARY KEY,
//!     first_name TEXT NOT NULL,
//!     last_name TEXT NOT NULL,
//!     is_active BOOLEAN NOT NULL DEFAULT TRUE,
//!     updated TIMESTAMPTZ NOT NULL
//! );
//! ```

use chrono::{DateTime, Utc};
use conference_core::account::{AccountProjection, AccountStore};
use conference_core::projection::{ProjectionError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

type AccountRow = (String, String, String, bool, DateTime<Utc>);

fn from_row((email, first_name, last_name, is_active, updated): AccountRow) -> AccountProjection {
    AccountProjection {
        email,
        first_name,
        last_name,
        is_active,
        updated,
    }
}

/// [`AccountStore`] backed by the `account_projections` table.
#[derive(Clone, Debug)]
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    /// Use an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool of up to `max_connections` against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the `account_projections` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl AccountStore for PostgresAccountStore {
    async fn upsert(&self, account: &AccountProjection) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO account_projections (email, first_name, last_name, is_active, updated)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                is_active = EXCLUDED.is_active,
                updated = EXCLUDED.updated
            ",
        )
        .bind(&account.email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.is_active)
        .bind(account.updated)
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to upsert account: {e}")))?;

        Ok(())
    }

    async fn delete(&self, email: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM account_projections WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to delete account: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, email: &str) -> Result<Option<AccountProjection>> {
        let row: Option<AccountRow> = sqlx::query_as(
            r"
            SELECT email, first_name, last_name, is_active, updated
            FROM account_projections
            WHERE email = $1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to get account: {e}")))?;

        Ok(row.map(from_row))
    }

    async fn list(&self) -> Result<Vec<AccountProjection>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r"
            SELECT email, first_name, last_name, is_active, updated
            FROM account_projections
            ORDER BY email
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to list accounts: {e}")))?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM account_projections")
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to clear accounts: {e}")))?;
        Ok(())
    }
}
