//! # Conference Runtime
//!
//! Broker plumbing shared by every Conference GO service component:
//!
//! - [`connection::ConnectionManager`]: opens connections, retries while the
//!   broker is unavailable and tracks [`connection::ConnectionState`]
//! - [`consumer::EventConsumer`]: subscribe-process-reconnect loop that hands
//!   each delivery to an [`handler::EventHandler`]
//! - [`retry::RetryPolicy`]: how connection attempts are repeated
//! - [`metrics::MetricsServer`]: Prometheus endpoint
//!
//! # Example
//!
//! ```rust,ignore
//! use conference_runtime::{ConnectionManager, EventConsumer, RetryPolicy};
//!
//! let manager = ConnectionManager::new("account-sync", bus, RetryPolicy::default());
//! let consumer = EventConsumer::new("account-sync", manager, shutdown_rx)
//!     .bind(Channel::broadcast(ACCOUNT_INFO), SubscribeOptions::default(), handler);
//!
//! consumer.run().await?;
//! ```

pub mod connection;
pub mod consumer;
pub mod handler;
pub mod metrics;
pub mod retry;

pub use connection::{ConnectionError, ConnectionManager, ConnectionState, SharedConnection};
pub use consumer::{Binding, ConsumerError, EventConsumer};
pub use handler::{EventHandler, HandlerError};
pub use retry::RetryPolicy;
