//! Broker abstraction for cross-service communication.
//!
//! This module provides the [`EventBus`] trait, a factory for broker
//! connections, and the [`BusConnection`] trait, which covers everything a
//! service does with one open connection: declare topology, publish, subscribe
//! and close.
//!
//! # Architecture
//!
//! ```text
//!  Monolith                      Broker                       Satellites
//! ┌──────────────┐        ┌─────────────────────┐        ┌──────────────────┐
//! │ approve()    │──pub──▶│ presentation_       │──1 of─▶│ presentation-    │
//! │ reject()     │        │ approvals/rejections│  N     │ mailer (×N)      │
//! └──────────────┘        │ (durable queues)    │        └──────────────────┘
//!                         │                     │        ┌──────────────────┐
//!  Identity service ─pub─▶│ account_info        │──all──▶│ account-sync (×N)│
//!                         │ (fanout)            │        └──────────────────┘
//!                         └─────────────────────┘
//! ```
//!
//! # Connections Are Not Shared
//!
//! Every consumer process and every one-shot publish opens its own
//! connection. Topology is declared again on each connection; declarations
//! are idempotent.
//!
//! # Acknowledgment
//!
//! [`AckMode`] selects when the broker is told a message is done:
//!
//! - [`AckMode::OnDelivery`] (default): before the handler runs. A crash while handling
//!   loses the message (at-most-once).
//! - [`AckMode::AfterProcessing`]: after the handler succeeds, via
//!   [`Delivery::ack`]. A crash leaves the message unacknowledged and the
//!   broker redelivers it (at-least-once). Handlers must be idempotent.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (conference-testing) - broker simulator for tests
//! - `RedpandaEventBus` (conference-redpanda) - Kafka protocol, for production

use crate::channel::Channel;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to open a connection to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was closed or dropped
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Failed to declare a channel
    #[error("Declare failed for channel '{channel}': {reason}")]
    DeclareFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message to a channel
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a channel
    #[error("Subscription failed for channel '{channel}': {reason}")]
    SubscriptionFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to acknowledge a delivery
    #[error("Acknowledge failed: {0}")]
    AckFailed(String),

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// When a delivery is acknowledged to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledge as soon as the message is handed to the subscriber.
    ///
    /// A subscriber that fails or crashes while handling the message loses it.
    #[default]
    OnDelivery,
    /// Acknowledge only when the subscriber calls [`Delivery::ack`].
    AfterProcessing,
}

impl AckMode {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OnDelivery => "on-delivery",
            Self::AfterProcessing => "after-processing",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on-delivery" | "on_delivery" | "auto" => Ok(Self::OnDelivery),
            "after-processing" | "after_processing" | "manual" => Ok(Self::AfterProcessing),
            other => Err(format!("unknown ack mode: {other}")),
        }
    }
}

/// Options for [`BusConnection::subscribe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Acknowledgment policy for this subscription.
    pub ack_mode: AckMode,

    /// Subscription group.
    ///
    /// - Broadcast channel, `None`: a private, ephemeral subscription that only
    ///   sees messages broadcast while this connection is open.
    /// - Broadcast channel, `Some(group)`: a durable subscription that keeps
    ///   messages broadcast while the group is disconnected.
    /// - Point-to-point channel: consumers sharing a group compete for
    ///   messages. `None` means the channel name; every consumer of a
    ///   point-to-point channel should use the same group.
    pub group: Option<String>,
}

impl SubscribeOptions {
    /// Options with the given ack mode and no explicit group.
    #[must_use]
    pub const fn new(ack_mode: AckMode) -> Self {
        Self {
            ack_mode,
            group: None,
        }
    }

    /// Set the subscription group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Future returned by broker operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Acknowledges one delivery to the broker.
///
/// Implemented by each broker backend. Dropping an acknowledger without
/// calling [`Acknowledger::ack`] leaves the message unacknowledged.
pub trait Acknowledger: Send + Sync {
    /// Tell the broker this message is done.
    fn ack(self: Box<Self>) -> BusFuture<'static, ()>;
}

/// One message handed to a subscriber.
pub struct Delivery {
    channel: Channel,
    payload: Vec<u8>,
    redelivered: bool,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// Create a delivery.
    ///
    /// `acker` is `None` when the broker already acknowledged the message
    /// ([`AckMode::OnDelivery`]).
    #[must_use]
    pub fn new(
        channel: Channel,
        payload: Vec<u8>,
        redelivered: bool,
        acker: Option<Box<dyn Acknowledger>>,
    ) -> Self {
        Self {
            channel,
            payload,
            redelivered,
            acker,
        }
    }

    /// The channel this message arrived on.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Raw message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the broker delivered this message before without an ack.
    #[must_use]
    pub const fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Whether this delivery still needs [`Delivery::ack`].
    #[must_use]
    pub const fn needs_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge the delivery. A no-op if it was already acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AckFailed`] if the broker rejects the ack.
    pub async fn ack(&mut self) -> Result<(), EventBusError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("channel", &self.channel)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("needs_ack", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries from one subscription.
///
/// An `Err` item or the end of the stream means the connection is gone.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Factory for broker connections.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn EventBus>` between consumers and publishers.
pub trait EventBus: Send + Sync {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the broker is unreachable.
    fn connect(&self) -> BusFuture<'_, Box<dyn BusConnection>>;
}

/// One open connection to the broker.
pub trait BusConnection: Send + Sync {
    /// Declare a channel. Idempotent: declaring an existing channel succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::DeclareFailed`] or a connectivity error.
    fn declare(&self, channel: &Channel) -> BusFuture<'_, ()>;

    /// Publish one message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] or a connectivity error.
    fn publish(&self, channel: &Channel, payload: &[u8]) -> BusFuture<'_, ()>;

    /// Bind a subscription to a channel and start receiving deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] or a connectivity error.
    fn subscribe(&self, channel: &Channel, options: &SubscribeOptions) -> BusFuture<'_, DeliveryStream>;

    /// Close the connection. Ephemeral subscriptions created on it are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker does not confirm the close; the
    /// connection is unusable either way.
    fn close(&self) -> BusFuture<'_, ()>;
}
