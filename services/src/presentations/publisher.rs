//! One-shot publisher for decision events.
//!
//! Every call opens its own connection, declares the decision queue, publishes
//! one message and closes the connection again. Connecting goes through the
//! publisher's [`ConnectionManager`], so with the default retry policy a call
//! made while the broker is down waits until it is back.

use conference_core::decision::{Decision, DecisionChannels, DecisionEvent};
use conference_core::event::{Event, EventError};
use conference_core::event_bus::{EventBus, EventBusError};
use conference_runtime::{ConnectionError, ConnectionManager, RetryPolicy, SharedConnection};
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`DecisionPublisher::publish`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The event could not be encoded
    #[error(transparent)]
    Encode(#[from] EventError),

    /// No connection could be established within the retry policy
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Connected, but the broker refused the message
    #[error("Failed to publish {decision} decision: {source}")]
    Publish {
        /// Which queue the message was for
        decision: Decision,
        /// Broker error
        #[source]
        source: EventBusError,
    },
}

/// Publishes decision events to the approval and rejection queues.
pub struct DecisionPublisher {
    manager: ConnectionManager,
    channels: DecisionChannels,
}

impl DecisionPublisher {
    /// Publisher for the default queues.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, policy: RetryPolicy) -> Self {
        Self::with_channels(bus, policy, DecisionChannels::default())
    }

    /// Publisher for custom queue names.
    #[must_use]
    pub fn with_channels(bus: Arc<dyn EventBus>, policy: RetryPolicy, channels: DecisionChannels) -> Self {
        Self {
            manager: ConnectionManager::new("decision-publisher", bus, policy),
            channels,
        }
    }

    /// Queues in use.
    #[must_use]
    pub const fn channels(&self) -> &DecisionChannels {
        &self.channels
    }

    /// Connection manager used for each call.
    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Publish one decision over a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Connection`] if a capped retry policy gives
    /// up, and [`PublishError::Publish`] if the broker refuses the message.
    pub async fn publish(&self, decision: Decision, event: &DecisionEvent) -> Result<(), PublishError> {
        let payload = event.to_bytes()?;
        let channel = self.channels.channel_for(decision);

        let (connection, ()) = self
            .manager
            .connect_with(|connection| async move { connection.declare(channel).await })
            .await?;

        let published = connection.publish(channel, &payload).await;
        self.close(&connection).await;

        published.map_err(|source| PublishError::Publish { decision, source })?;

        metrics::counter!(
            "decision_events_published_total",
            "decision" => decision.as_str(),
            "dispatch" => "direct"
        )
        .increment(1);
        tracing::info!(
            decision = %decision,
            channel = %channel,
            presenter_email = %event.presenter_email,
            title = %event.title,
            "Decision published"
        );
        Ok(())
    }

    async fn close(&self, connection: &SharedConnection) {
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "Failed to close publisher connection");
        }
        self.manager.mark_disconnected();
    }
}
