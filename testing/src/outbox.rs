//! In-memory [`DecisionOutbox`].

#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use conference_core::outbox::{DecisionOutbox, OutboxEntry, OutboxError, OutboxFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Outbox table held in a `Vec`, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDecisionOutbox {
    entries: Arc<Mutex<Vec<OutboxEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDecisionOutbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`OutboxError::Storage`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of every entry, dispatched or not.
    #[must_use]
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of entries still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.is_pending())
            .count()
    }

    fn check(&self) -> Result<(), OutboxError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(OutboxError::Storage("outbox unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn update(&self, id: Uuid, change: impl FnOnce(&mut OutboxEntry)) -> Result<(), OutboxError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        change(entry);
        Ok(())
    }
}

impl DecisionOutbox for InMemoryDecisionOutbox {
    fn enqueue(&self, entry: &OutboxEntry) -> OutboxFuture<'_, ()> {
        let entry = entry.clone();
        Box::pin(async move {
            self.check()?;
            self.entries.lock().unwrap().push(entry);
            Ok(())
        })
    }

    fn pending(&self, limit: usize) -> OutboxFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| entry.is_pending())
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> OutboxFuture<'_, ()> {
        Box::pin(async move { self.update(id, |entry| entry.dispatched_at = Some(at)) })
    }

    fn record_failure(&self, id: Uuid, error: &str) -> OutboxFuture<'_, ()> {
        let error = error.to_string();
        Box::pin(async move {
            self.update(id, |entry| {
                entry.attempts += 1;
                entry.last_error = Some(error);
            })
        })
    }
}
