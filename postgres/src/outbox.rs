//! Decision outbox table.
//!
//! Each row holds one [`DecisionEvent`] as JSON plus its delivery state.
//! A row is pending while `dispatched_at` is null.

use chrono::{DateTime, Utc};
use conference_core::decision::{Decision, DecisionEvent};
use conference_core::outbox::{DecisionOutbox, OutboxEntry, OutboxError, OutboxFuture};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

/// [`DecisionOutbox`] backed by the `decision_outbox` table.
#[derive(Clone, Debug)]
pub struct PostgresDecisionOutbox {
    pool: PgPool,
}

impl PostgresDecisionOutbox {
    /// Use an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool of up to `max_connections` against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, OutboxError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| OutboxError::Storage(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the `decision_outbox` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), OutboxError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OutboxError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of rows not yet dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, OutboxError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM decision_outbox WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| OutboxError::Storage(e.to_string()))?;
        Ok(count)
    }

    async fn insert(&self, entry: &OutboxEntry) -> Result<(), OutboxError> {
        let payload = serde_json::to_value(&entry.event)
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO decision_outbox (
                id, decision, payload, created_at, attempts, last_error, dispatched_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(entry.id)
        .bind(entry.decision.as_str())
        .bind(payload)
        .bind(entry.created_at)
        .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
        .bind(entry.last_error.as_deref())
        .bind(entry.dispatched_at)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        tracing::debug!(
            outbox_id = %entry.id,
            decision = %entry.decision,
            presenter_email = %entry.event.presenter_email,
            "Decision stored in outbox"
        );
        Ok(())
    }

    async fn select_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows = sqlx::query(
            r"
            SELECT id, decision, payload, created_at, attempts, last_error, dispatched_at
            FROM decision_outbox
            WHERE dispatched_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            ",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn set_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        let result = sqlx::query("UPDATE decision_outbox SET dispatched_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn add_failure(&self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r"
            UPDATE decision_outbox
            SET attempts = attempts + 1, last_error = $1
            WHERE id = $2
            ",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }

        tracing::warn!(outbox_id = %id, error, "Outbox dispatch attempt failed");
        metrics::counter!("outbox_failures_total").increment(1);
        Ok(())
    }

    fn row_to_entry(row: &PgRow) -> Result<OutboxEntry, OutboxError> {
        let storage = |e: sqlx::Error| OutboxError::Storage(e.to_string());

        let decision: String = row.try_get("decision").map_err(storage)?;
        let decision: Decision = decision.parse().map_err(OutboxError::Serialization)?;
        let payload: serde_json::Value = row.try_get("payload").map_err(storage)?;
        let event: DecisionEvent = serde_json::from_value(payload)
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;
        let attempts: i32 = row.try_get("attempts").map_err(storage)?;

        Ok(OutboxEntry {
            id: row.try_get("id").map_err(storage)?,
            decision,
            event,
            created_at: row.try_get("created_at").map_err(storage)?,
            attempts: u32::try_from(attempts).unwrap_or_default(),
            last_error: row.try_get("last_error").map_err(storage)?,
            dispatched_at: row.try_get("dispatched_at").map_err(storage)?,
        })
    }
}

impl DecisionOutbox for PostgresDecisionOutbox {
    fn enqueue(&self, entry: &OutboxEntry) -> OutboxFuture<'_, ()> {
        let entry = entry.clone();
        Box::pin(async move { self.insert(&entry).await })
    }

    fn pending(&self, limit: usize) -> OutboxFuture<'_, Vec<OutboxEntry>> {
        Box::pin(self.select_pending(limit))
    }

    fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> OutboxFuture<'_, ()> {
        Box::pin(self.set_dispatched(id, at))
    }

    fn record_failure(&self, id: Uuid, error: &str) -> OutboxFuture<'_, ()> {
        let error = error.to_string();
        Box::pin(async move { self.add_failure(id, &error).await })
    }
}
