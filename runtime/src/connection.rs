//! Broker connection lifecycle.
//!
//! A [`ConnectionManager`] opens connections for one service component and
//! owns its [`ConnectionState`]:
//!
//! ```text
//!              connect()                 connect + setup ok
//! Disconnected ─────────▶ Connecting ───────────────────────▶ Connected
//!      ▲                      │                                   │
//!      │    attempt failed,   │                                   │ mark_disconnected()
//!      └──── retry delay ─────┘                                   │
//!      └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Failed attempts are retried according to the manager's
//! [`RetryPolicy`]. With the default policy they are retried forever, so the
//! caller's future does not complete until the broker is reachable.

use crate::retry::RetryPolicy;
use conference_core::event_bus::{BusConnection, EventBus, EventBusError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// An open connection shared between a consumer and its setup steps.
pub type SharedConnection = Arc<dyn BusConnection>;

/// Where a [`ConnectionManager`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    Disconnected,
    /// An attempt (connect plus topology setup) is in progress
    Connecting,
    /// Connected and set up
    Connected,
}

impl ConnectionState {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from [`ConnectionManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The retry policy's cap was reached without a successful attempt.
    #[error("Gave up connecting to the broker after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made
        attempts: usize,
        /// Error from the last attempt
        last_error: EventBusError,
    },
}

/// Opens broker connections, retrying until one succeeds.
pub struct ConnectionManager {
    name: String,
    bus: Arc<dyn EventBus>,
    policy: RetryPolicy,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Create a manager for the component `name` (used in logs and metrics).
    #[must_use]
    pub fn new(name: impl Into<String>, bus: Arc<dyn EventBus>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.into(),
            bus,
            policy,
            state,
        }
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Record that the current connection is gone.
    pub fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Delay to wait before reconnecting after a lost connection.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.policy.delay_for_attempt(0)
    }

    /// Open a connection, retrying until one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::RetriesExhausted`] if the policy has a cap
    /// and every attempt failed.
    pub async fn connect(&self) -> Result<SharedConnection, ConnectionError> {
        self.connect_with(|_| async { Ok(()) })
            .await
            .map(|(connection, ())| connection)
    }

    /// Open a connection and run `setup` on it, retrying both until they
    /// succeed together.
    ///
    /// `setup` typically declares channels and subscribes. If it fails, the
    /// half-configured connection is closed and the whole attempt is repeated
    /// on a fresh connection after the retry delay.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::RetriesExhausted`] if the policy has a cap
    /// and every attempt failed.
    pub async fn connect_with<T, F, Fut>(
        &self,
        mut setup: F,
    ) -> Result<(SharedConnection, T), ConnectionError>
    where
        F: FnMut(SharedConnection) -> Fut,
        Fut: Future<Output = Result<T, EventBusError>>,
    {
        let mut attempt = 0usize;

        loop {
            self.set_state(ConnectionState::Connecting);
            metrics::counter!("broker_connect_attempts_total", "component" => self.name.clone())
                .increment(1);

            let error = match self.bus.connect().await {
                Ok(connection) => {
                    let connection: SharedConnection = Arc::from(connection);
                    match setup(Arc::clone(&connection)).await {
                        Ok(output) => {
                            self.set_state(ConnectionState::Connected);
                            tracing::info!(
                                component = %self.name,
                                attempts = attempt + 1,
                                "Connected to broker"
                            );
                            return Ok((connection, output));
                        }
                        Err(e) => {
                            if let Err(close_error) = connection.close().await {
                                tracing::debug!(
                                    component = %self.name,
                                    error = %close_error,
                                    "Failed to close connection after setup error"
                                );
                            }
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            self.set_state(ConnectionState::Disconnected);
            attempt += 1;

            if !self.policy.allows_attempt(attempt) {
                tracing::error!(
                    component = %self.name,
                    attempts = attempt,
                    error = %error,
                    "Giving up connecting to broker"
                );
                return Err(ConnectionError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.policy.delay_for_attempt(attempt - 1);
            tracing::warn!(
                component = %self.name,
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "Broker not available, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(component = %self.name, from = %previous, to = %next, "Connection state changed");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
