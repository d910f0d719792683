//! Account snapshots broadcast by the identity service, and the local
//! read-only copy kept by services that need presenter/attendee names.

use crate::event::{Event, iso8601};
use crate::projection::Result;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Full snapshot of an identity record, broadcast on every change.
///
/// Carries no sequence number. `updated` is the only ordering hint and the
/// broker does not promise to deliver snapshots in `updated` order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshotEvent {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Natural key
    pub email: String,
    /// `false` means the account was deactivated or deleted upstream
    pub is_active: bool,
    /// When the upstream record last changed
    #[serde(with = "iso8601")]
    pub updated: DateTime<Utc>,
}

impl Event for AccountSnapshotEvent {
    fn event_type(&self) -> &'static str {
        "AccountSnapshot"
    }
}

impl AccountSnapshotEvent {
    /// The projection row this snapshot produces, or `None` for an inactive
    /// account (which must not have a row).
    #[must_use]
    pub fn to_projection(&self) -> Option<AccountProjection> {
        self.is_active.then(|| AccountProjection {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            is_active: true,
            updated: self.updated,
        })
    }
}

/// Local read-only account row, keyed by `email`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProjection {
    /// Natural key
    pub email: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Always `true` for a stored row
    pub is_active: bool,
    /// `updated` of the snapshot that produced this row
    pub updated: DateTime<Utc>,
}

/// Storage for [`AccountProjection`] rows.
///
/// Only the account projection writes through this trait; everything else
/// reads.
pub trait AccountStore: Send + Sync {
    /// Insert or replace the row for `account.email`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::projection::ProjectionError::Storage) if the write fails.
    fn upsert(&self, account: &AccountProjection) -> impl Future<Output = Result<()>> + Send;

    /// Delete the row for `email`. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::projection::ProjectionError::Storage) if the delete fails.
    fn delete(&self, email: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Fetch the row for `email`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::projection::ProjectionError::Storage) if the read fails.
    fn get(&self, email: &str) -> impl Future<Output = Result<Option<AccountProjection>>> + Send;

    /// All rows, ordered by email.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::projection::ProjectionError::Storage) if the read fails.
    fn list(&self) -> impl Future<Output = Result<Vec<AccountProjection>>> + Send;

    /// Remove every row.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](crate::projection::ProjectionError::Storage) if the delete fails.
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;
}
