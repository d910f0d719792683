//! Projection system for maintaining local read models of foreign data.
//!
//! # Overview
//!
//! A projection is a local, derived, read-only copy of data owned by another
//! service. The owning service broadcasts snapshots; a projection consumes them
//! and updates a table optimized for local reads.
//!
//! ```text
//! Identity service (owner)          Attendees service (reader)
//! ┌─────────────────────┐          ┌─────────────────────┐
//! │  accounts           │          │  account_projections│
//! │  (source of truth)  │   →→→    │  (read-only copy)   │
//! └─────────────────────┘ snapshots└─────────────────────┘
//!          │                                  ▲
//!          │ broadcast                        │ upsert / delete
//!          ▼                                  │
//! ┌──────────────────────────────────────────────────────┐
//! │              account_info (fanout)                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Projections are best-effort. They lag behind the owner, miss anything
//! broadcast while their consumer was disconnected (ephemeral subscription),
//! and, unless told otherwise, let whichever snapshot was processed last win.

use serde::Deserialize;
use std::future::Future;

/// Error type for projection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Event processing error
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// A projection builds and maintains a read model from events.
///
/// # Idempotency
///
/// Brokers redeliver. `apply_event` must leave the same state whether an event
/// is applied once or several times in a row.
pub trait Projection: Send + Sync {
    /// The event type this projection listens to.
    type Event: for<'de> Deserialize<'de> + Send + Sync;

    /// Projection name, used in logs.
    fn name(&self) -> &str;

    /// Apply an event to update the projection.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if storage fails.
    fn apply_event(&self, event: &Self::Event) -> impl Future<Output = Result<()>> + Send;

    /// Drop all projection data.
    ///
    /// Default implementation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the data cannot be dropped.
    fn rebuild(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
