//! Transactional outbox for presentation decisions.
//!
//! When enabled, an approve/reject transition records the decision here
//! instead of publishing it. A dispatcher later publishes pending entries and
//! marks them dispatched, so the transition no longer waits on the broker.
//!
//! Dispatch is at-least-once: an entry published just before a crash (and
//! before [`DecisionOutbox::mark_dispatched`]) is published again.

use crate::decision::{Decision, DecisionEvent};
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors from outbox storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// Storage backend error
    #[error("Outbox storage error: {0}")]
    Storage(String),

    /// A stored payload could not be decoded
    #[error("Outbox serialization error: {0}")]
    Serialization(String),

    /// No entry with this id
    #[error("Outbox entry not found: {0}")]
    NotFound(Uuid),
}

/// A decision waiting for (or done with) publication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Entry id
    pub id: Uuid,
    /// Which channel the event goes to
    pub decision: Decision,
    /// The message to publish
    pub event: DecisionEvent,
    /// When the transition happened
    pub created_at: DateTime<Utc>,
    /// Failed publish attempts so far
    pub attempts: u32,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
    /// When the entry was published, `None` while pending
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// A fresh pending entry.
    #[must_use]
    pub fn new(decision: Decision, event: DecisionEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            decision,
            event,
            created_at,
            attempts: 0,
            last_error: None,
            dispatched_at: None,
        }
    }

    /// Whether the entry still needs publishing.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.dispatched_at.is_none()
    }
}

/// Future returned by outbox operations.
pub type OutboxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OutboxError>> + Send + 'a>>;

/// Storage for [`OutboxEntry`] rows.
///
/// Dyn-compatible so the workflow can hold it as `Arc<dyn DecisionOutbox>`.
pub trait DecisionOutbox: Send + Sync {
    /// Store a new pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the write fails.
    fn enqueue(&self, entry: &OutboxEntry) -> OutboxFuture<'_, ()>;

    /// Up to `limit` pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the read fails.
    fn pending(&self, limit: usize) -> OutboxFuture<'_, Vec<OutboxEntry>>;

    /// Mark an entry published.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::NotFound`] for an unknown id.
    fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> OutboxFuture<'_, ()>;

    /// Record a failed publish attempt; the entry stays pending.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::NotFound`] for an unknown id.
    fn record_failure(&self, id: Uuid, error: &str) -> OutboxFuture<'_, ()>;
}
