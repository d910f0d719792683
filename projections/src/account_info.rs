//! Local read model of identity-service accounts.
//!
//! [`AccountInfoProjection`] applies [`AccountSnapshotEvent`]s to an
//! [`AccountStore`]: an active snapshot upserts the row for its email, an
//! inactive one deletes it. Applying the same snapshot twice leaves the same
//! state, so redelivery is harmless.
//!
//! Snapshots carry no sequence number and the broker does not order them by
//! `updated`. Under [`ConflictPolicy::LastProcessedWins`] a stale snapshot
//! processed after a newer one overwrites it. [`ConflictPolicy::NewestUpdatedWins`]
//! compares `updated` against the stored row and skips older snapshots; a
//! deleted row leaves nothing to compare against, so a stale active snapshot
//! arriving after a deactivation still recreates it.

use conference_core::account::{AccountProjection, AccountSnapshotEvent, AccountStore};
use conference_core::projection::{Projection, Result};
use std::fmt;
use std::str::FromStr;

/// How concurrent versions of the same account are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Whatever snapshot is processed last wins, regardless of `updated`.
    #[default]
    LastProcessedWins,
    /// Skip snapshots older than the stored row.
    NewestUpdatedWins,
}

impl ConflictPolicy {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LastProcessedWins => "last-processed-wins",
            Self::NewestUpdatedWins => "newest-updated-wins",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "last-processed-wins" | "last-processed" => Ok(Self::LastProcessedWins),
            "newest-updated-wins" | "newest-updated" => Ok(Self::NewestUpdatedWins),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// What applying one snapshot did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The row was inserted or replaced
    Upserted,
    /// The row was deleted
    Deleted,
    /// Inactive snapshot for an email with no row
    AlreadyAbsent,
    /// Older than the stored row; left untouched
    SkippedStale,
}

/// Projection of the `account_info` broadcast into an [`AccountStore`].
#[derive(Debug, Clone)]
pub struct AccountInfoProjection<S> {
    store: S,
    policy: ConflictPolicy,
}

impl<S: AccountStore> AccountInfoProjection<S> {
    /// Projection with the default [`ConflictPolicy`].
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: ConflictPolicy::default(),
        }
    }

    /// Use `policy` to resolve out-of-order snapshots.
    #[must_use]
    pub const fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Conflict policy in use.
    #[must_use]
    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Apply one snapshot and report what happened.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](conference_core::projection::ProjectionError::Storage)
    /// if the store fails.
    pub async fn apply(&self, snapshot: &AccountSnapshotEvent) -> Result<ApplyOutcome> {
        if self.policy == ConflictPolicy::NewestUpdatedWins {
            if let Some(stored) = self.store.get(&snapshot.email).await? {
                if snapshot.updated < stored.updated {
                    tracing::debug!(
                        email = %snapshot.email,
                        snapshot_updated = %snapshot.updated,
                        stored_updated = %stored.updated,
                        "Skipping stale account snapshot"
                    );
                    return Ok(ApplyOutcome::SkippedStale);
                }
            }
        }

        let outcome = match snapshot.to_projection() {
            Some(row) => {
                self.store.upsert(&row).await?;
                ApplyOutcome::Upserted
            }
            None if self.store.delete(&snapshot.email).await? => ApplyOutcome::Deleted,
            None => ApplyOutcome::AlreadyAbsent,
        };

        tracing::info!(
            email = %snapshot.email,
            is_active = snapshot.is_active,
            outcome = ?outcome,
            "Account projection updated"
        );
        Ok(outcome)
    }

    /// The row for `email`, if the account is active.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn get(&self, email: &str) -> Result<Option<AccountProjection>> {
        self.store.get(email).await
    }

    /// Every active account, ordered by email.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn list(&self) -> Result<Vec<AccountProjection>> {
        self.store.list().await
    }
}

impl<S: AccountStore> Projection for AccountInfoProjection<S> {
    type Event = AccountSnapshotEvent;

    fn name(&self) -> &str {
        "account_info"
    }

    async fn apply_event(&self, event: &Self::Event) -> Result<()> {
        self.apply(event).await.map(|_| ())
    }

    /// Empty the table. Broadcasts are not replayed, so rows come back only
    /// as accounts change upstream.
    async fn rebuild(&self) -> Result<()> {
        tracing::warn!(projection = self.name(), "Clearing account projection");
        self.store.clear().await
    }
}
