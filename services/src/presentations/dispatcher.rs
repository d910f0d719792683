//! Publishes decisions recorded in the outbox.
//!
//! ```text
//! loop {
//!     pending = outbox.pending(batch)
//!     empty         ─▶ sleep poll interval
//!     otherwise     ─▶ connect, declare queues, publish each in order
//!                      ok    ─▶ mark dispatched
//!                      error ─▶ record failure, stop batch, sleep retry delay
//! }
//! ```
//!
//! An entry published right before a crash is published again on restart,
//! so the mailer may see the same decision twice.

use conference_core::decision::DecisionChannels;
use conference_core::environment::{Clock, SystemClock};
use conference_core::event::{Event, EventError};
use conference_core::event_bus::{EventBus, EventBusError};
use conference_core::outbox::{DecisionOutbox, OutboxEntry, OutboxError};
use conference_runtime::{ConnectionError, ConnectionManager, RetryPolicy, SharedConnection};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from one dispatch pass.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Reading or updating the outbox failed
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// No connection within the retry policy
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// An entry could not be published
    #[error("Failed to publish outbox entry {id}: {reason}")]
    Publish {
        /// Entry id
        id: uuid::Uuid,
        /// Broker or encoding error
        reason: String,
    },
}

/// Drains the decision outbox to the broker.
pub struct OutboxDispatcher {
    outbox: Arc<dyn DecisionOutbox>,
    manager: ConnectionManager,
    channels: DecisionChannels,
    batch_size: usize,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl OutboxDispatcher {
    /// Dispatcher for the default queues, polling every second in batches of 50.
    #[must_use]
    pub fn new(outbox: Arc<dyn DecisionOutbox>, bus: Arc<dyn EventBus>, policy: RetryPolicy) -> Self {
        Self {
            outbox,
            manager: ConnectionManager::new("outbox-dispatcher", bus, policy),
            channels: DecisionChannels::default(),
            batch_size: 50,
            poll_interval: Duration::from_secs(1),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use custom queue names.
    #[must_use]
    pub fn with_channels(mut self, channels: DecisionChannels) -> Self {
        self.channels = channels;
        self
    }

    /// Entries published per connection. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause between polls of a drained outbox.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Clock that stamps `dispatched_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish up to one batch of pending entries. Returns how many were
    /// dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on the first entry that cannot be published
    /// (after recording the failure), or if the outbox or broker is unavailable.
    pub async fn dispatch_pending(&self) -> Result<usize, DispatchError> {
        let pending = self.outbox.pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let channels = &self.channels;
        let (connection, ()) = self
            .manager
            .connect_with(|connection| async move {
                for channel in channels.all() {
                    connection.declare(channel).await?;
                }
                Ok::<(), EventBusError>(())
            })
            .await?;

        let result = self.publish_batch(&connection, &pending).await;

        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "Failed to close dispatcher connection");
        }
        self.manager.mark_disconnected();
        result
    }

    async fn publish_batch(
        &self,
        connection: &SharedConnection,
        pending: &[OutboxEntry],
    ) -> Result<usize, DispatchError> {
        let mut dispatched = 0;

        for entry in pending {
            if let Err(reason) = self.publish_entry(connection, entry).await {
                let reason = reason.to_string();
                self.outbox.record_failure(entry.id, &reason).await?;
                return Err(DispatchError::Publish { id: entry.id, reason });
            }

            self.outbox.mark_dispatched(entry.id, self.clock.now()).await?;
            dispatched += 1;

            metrics::counter!(
                "decision_events_published_total",
                "decision" => entry.decision.as_str(),
                "dispatch" => "outbox"
            )
            .increment(1);
            metrics::counter!("outbox_dispatched_total").increment(1);
            tracing::info!(
                outbox_id = %entry.id,
                decision = %entry.decision,
                presenter_email = %entry.event.presenter_email,
                attempts = entry.attempts + 1,
                "Outbox entry dispatched"
            );
        }

        Ok(dispatched)
    }

    async fn publish_entry(&self, connection: &SharedConnection, entry: &OutboxEntry) -> Result<(), PublishFailure> {
        let payload = entry.event.to_bytes()?;
        connection
            .publish(self.channels.channel_for(entry.decision), &payload)
            .await?;
        Ok(())
    }

    /// Dispatch until `shutdown` fires.
    ///
    /// A full batch is followed immediately by the next pass; a partial one
    /// by the poll interval; a failure by the connection retry delay.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis(),
            "Outbox dispatcher started"
        );

        loop {
            let pause = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.dispatch_pending() => match result {
                    Ok(count) if count >= self.batch_size => Duration::ZERO,
                    Ok(_) => self.poll_interval,
                    Err(e) => {
                        let delay = self.manager.reconnect_delay();
                        tracing::warn!(error = %e, delay_ms = delay.as_millis(), "Outbox dispatch failed");
                        delay
                    }
                },
            };

            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Outbox dispatcher stopped");
    }
}

#[derive(Debug, Error)]
enum PublishFailure {
    #[error(transparent)]
    Encode(#[from] EventError),
    #[error(transparent)]
    Broker(#[from] EventBusError),
}
