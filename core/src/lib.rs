//! # Conference GO Core
//!
//! Core traits and types for the event synchronization layer shared by the
//! conference monolith and its satellite services.
//!
//! The services never share storage. Everything they know about each other
//! travels over a message broker as JSON messages on one of three channels:
//!
//! | Channel | Pattern | Payload |
//! |---|---|---|
//! | `account_info` | broadcast (fanout) | [`AccountSnapshotEvent`](account::AccountSnapshotEvent) |
//! | `presentation_approvals` | point-to-point, durable | [`DecisionEvent`](decision::DecisionEvent) |
//! | `presentation_rejections` | point-to-point, durable | [`DecisionEvent`](decision::DecisionEvent) |
//!
//! ## Modules
//!
//! - [`channel`]: Channel names and delivery patterns
//! - [`event`]: The [`Event`](event::Event) wire trait and ISO-8601 timestamp handling
//! - [`event_bus`]: Broker abstraction ([`EventBus`](event_bus::EventBus),
//!   [`BusConnection`](event_bus::BusConnection), [`Delivery`](event_bus::Delivery))
//! - [`account`]: Account snapshots and the local account projection row
//! - [`decision`]: Presentation decisions and their channels
//! - [`outbox`]: Local outbox for decisions awaiting publication
//! - [`projection`]: The [`Projection`](projection::Projection) trait for read models
//!
//! ## Example
//!
//! ```ignore
//! use conference_core::event_bus::{EventBus, SubscribeOptions};
//! use conference_core::channel::Channel;
//!
//! let connection = event_bus.connect().await?;
//! let channel = Channel::broadcast("account_info");
//! connection.declare(&channel).await?;
//! let mut deliveries = connection.subscribe(&channel, &SubscribeOptions::default()).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod account;
pub mod channel;
pub mod decision;
pub mod event;
pub mod event_bus;
pub mod outbox;
pub mod projection;

/// Environment module - Injected dependencies
pub mod environment {
    use super::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Injected wherever a timestamp is stamped onto persisted state
    /// (outbox entries, projection rebuilds) so tests can pin it.
    pub trait Clock: Send + Sync {
        /// Get the current time.
        fn now(&self) -> DateTime<Utc>;
    }

    /// System clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
