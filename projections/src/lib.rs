//! Account read model for Conference GO services.
//!
//! The identity service broadcasts an [`AccountSnapshotEvent`] on every
//! account change. Services that show presenter or attendee names keep a
//! local copy of the active accounts through an [`AccountInfoProjection`],
//! stored either in Postgres ([`PostgresAccountStore`]) or in memory for tests.
//!
//! # Example
//!
//! ```ignore
//! use conference_projections::{AccountInfoProjection, ConflictPolicy, PostgresAccountStore};
//!
//! let store = PostgresAccountStore::connect("postgres://localhost/attendees", 5).await?;
//! store.migrate().await?;
//!
//! let projection = AccountInfoProjection::new(store).with_policy(ConflictPolicy::NewestUpdatedWins);
//! projection.apply(&snapshot).await?;
//! ```
//!
//! [`AccountSnapshotEvent`]: conference_core::account::AccountSnapshotEvent

pub mod account_info;
pub mod postgres;

pub use account_info::{AccountInfoProjection, ApplyOutcome, ConflictPolicy};
pub use postgres::PostgresAccountStore;
