//! In-memory [`AccountStore`] for fast, deterministic projection tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use conference_core::account::{AccountProjection, AccountStore};
use conference_core::projection::{ProjectionError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// `BTreeMap`-backed account projection table.
///
/// Cloning shares the same table, so a test can hand one clone to the
/// projection and inspect the other.
///
/// # Example
///
/// ```
/// use conference_core::account::{AccountProjection, AccountStore};
/// use conference_testing::{InMemoryAccountStore, test_clock};
/// use conference_core::environment::Clock;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryAccountStore::new();
/// store.upsert(&AccountProjection {
///     email: "a@x.com".into(),
///     first_name: "A".into(),
///     last_name: "B".into(),
///     is_active: true,
///     updated: test_clock().now(),
/// }).await.unwrap();
///
/// assert!(store.contains("a@x.com"));
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAccountStore {
    rows: Arc<RwLock<BTreeMap<String, AccountProjection>>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryAccountStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`ProjectionError::Storage`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Whether a row exists for `email`.
    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        self.rows.read().unwrap().contains_key(email)
    }

    /// Synchronous read of one row.
    #[must_use]
    pub fn row(&self, email: &str) -> Option<AccountProjection> {
        self.rows.read().unwrap().get(email).cloned()
    }

    /// Upserts and deletes performed so far (including no-op deletes).
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ProjectionError::Storage("account store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl AccountStore for InMemoryAccountStore {
    async fn upsert(&self, account: &AccountProjection) -> Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows
            .write()
            .unwrap()
            .insert(account.email.clone(), account.clone());
        Ok(())
    }

    async fn delete(&self, email: &str) -> Result<bool> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.write().unwrap().remove(email).is_some())
    }

    async fn get(&self, email: &str) -> Result<Option<AccountProjection>> {
        self.check()?;
        Ok(self.rows.read().unwrap().get(email).cloned())
    }

    async fn list(&self) -> Result<Vec<AccountProjection>> {
        self.check()?;
        Ok(self.rows.read().unwrap().values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.rows.write().unwrap().clear();
        Ok(())
    }
}
