//! Long-running broker consumer with automatic reconnection.
//!
//! [`EventConsumer`] owns the subscribe-process-reconnect loop shared by every
//! consuming component. A component only supplies bindings (channel,
//! subscription options, handler).
//!
//! ```text
//! loop {
//!     connect (retried by ConnectionManager):
//!         declare + subscribe every binding
//!     process:
//!         next delivery ─▶ handler ─▶ ack (after-processing mode)
//!         handler error  ─▶ stop consumer, delivery stays unacked
//!     connection lost:
//!         wait reconnect delay, loop
//! }
//! ```
//!
//! Deliveries from all bindings are merged into one stream and handled one at
//! a time, so a handler never runs concurrently with itself.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::new("account-sync", manager, shutdown_rx)
//!     .bind(Channel::broadcast(ACCOUNT_INFO), SubscribeOptions::default(), handler);
//!
//! let handle = consumer.spawn();
//! ```

use crate::connection::{ConnectionError, ConnectionManager, SharedConnection};
use crate::handler::{EventHandler, HandlerError};
use conference_core::channel::Channel;
use conference_core::event_bus::{Delivery, EventBusError, SubscribeOptions};
use futures::StreamExt;
use futures::stream::{BoxStream, SelectAll};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Errors that stop an [`EventConsumer`].
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A handler failed; the consumer stops rather than skip the message.
    #[error("Handler failed on channel '{channel}': {source}")]
    Handler {
        /// Channel of the failed delivery
        channel: String,
        /// Handler error
        #[source]
        source: HandlerError,
    },

    /// The connection retry policy was exhausted.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// One channel subscription and the handler for its deliveries.
#[derive(Clone)]
pub struct Binding {
    channel: Channel,
    options: SubscribeOptions,
    handler: Arc<dyn EventHandler>,
}

impl Binding {
    /// Bind `handler` to `channel`.
    #[must_use]
    pub fn new(channel: Channel, options: SubscribeOptions, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            channel,
            options,
            handler,
        }
    }

    /// The bound channel.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }
}

type MergedStream = SelectAll<BoxStream<'static, (usize, Result<Delivery, EventBusError>)>>;

enum StreamOutcome {
    Shutdown,
    Lost(EventBusError),
    Failed(ConsumerError),
}

/// Broker consumer for one service component.
pub struct EventConsumer {
    name: String,
    manager: ConnectionManager,
    bindings: Vec<Binding>,
    shutdown: broadcast::Receiver<()>,
}

impl EventConsumer {
    /// Create a consumer with no bindings.
    ///
    /// The consumer stops when a value is sent on (or the sender of)
    /// `shutdown` goes away.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        manager: ConnectionManager,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            manager,
            bindings: Vec::new(),
            shutdown,
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn bind(
        mut self,
        channel: Channel,
        options: SubscribeOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.bindings.push(Binding::new(channel, options, handler));
        self
    }

    /// Add a prepared binding.
    #[must_use]
    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Connection manager driving this consumer.
    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<(), ConsumerError>> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown, a handler failure, or retry exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Handler`] if a handler fails and
    /// [`ConsumerError::Connection`] if a capped retry policy gives up.
    pub async fn run(mut self) -> Result<(), ConsumerError> {
        let channels: Vec<&str> = self.bindings.iter().map(|b| b.channel.name()).collect();
        info!(consumer = %self.name, channels = ?channels, "Event consumer started");

        loop {
            let bindings = &self.bindings;
            let connected = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    return Ok(());
                }
                result = self.manager.connect_with(|connection| subscribe_all(connection, bindings)) => result?,
            };
            let (connection, mut stream) = connected;
            info!(consumer = %self.name, "Subscribed, waiting for deliveries");

            let outcome = self.process_stream(&mut stream).await;

            drop(stream);
            if let Err(e) = connection.close().await {
                debug!(consumer = %self.name, error = %e, "Failed to close connection");
            }
            self.manager.mark_disconnected();

            match outcome {
                StreamOutcome::Shutdown => {
                    info!(consumer = %self.name, "Event consumer stopped");
                    return Ok(());
                }
                StreamOutcome::Failed(e) => return Err(e),
                StreamOutcome::Lost(e) => {
                    let delay = self.manager.reconnect_delay();
                    warn!(
                        consumer = %self.name,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            info!(consumer = %self.name, "Event consumer stopped");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn process_stream(&mut self, stream: &mut MergedStream) -> StreamOutcome {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during processing");
                    return StreamOutcome::Shutdown;
                }
                next = stream.next() => match next {
                    Some((index, Ok(delivery))) => {
                        if let Err(outcome) = self.dispatch(index, delivery).await {
                            return outcome;
                        }
                    }
                    Some((_, Err(e))) => return StreamOutcome::Lost(e),
                    None => {
                        return StreamOutcome::Lost(EventBusError::ConnectionClosed(
                            "delivery stream ended".to_string(),
                        ));
                    }
                },
            }
        }
    }

    async fn dispatch(&self, index: usize, mut delivery: Delivery) -> Result<(), StreamOutcome> {
        let Some(binding) = self.bindings.get(index) else {
            return Err(StreamOutcome::Lost(EventBusError::TransportError(format!(
                "delivery for unknown binding {index}"
            ))));
        };
        let channel = binding.channel.name();

        metrics::counter!(
            "consumer_deliveries_total",
            "consumer" => self.name.clone(),
            "channel" => channel.to_string()
        )
        .increment(1);

        if let Err(e) = binding.handler.handle(&delivery).await {
            metrics::counter!(
                "consumer_handler_failures_total",
                "consumer" => self.name.clone(),
                "channel" => channel.to_string()
            )
            .increment(1);
            error!(
                consumer = %self.name,
                channel = %channel,
                redelivered = delivery.is_redelivered(),
                error = %e,
                "Failed to handle delivery, stopping consumer"
            );
            return Err(StreamOutcome::Failed(ConsumerError::Handler {
                channel: channel.to_string(),
                source: e,
            }));
        }

        if let Err(e) = delivery.ack().await {
            warn!(consumer = %self.name, channel = %channel, error = %e, "Failed to acknowledge delivery");
            return Err(StreamOutcome::Lost(e));
        }

        debug!(consumer = %self.name, channel = %channel, "Delivery processed");
        Ok(())
    }
}

async fn subscribe_all(
    connection: SharedConnection,
    bindings: &[Binding],
) -> Result<MergedStream, EventBusError> {
    let mut streams = Vec::with_capacity(bindings.len());

    for (index, binding) in bindings.iter().enumerate() {
        connection.declare(&binding.channel).await?;
        let deliveries = connection.subscribe(&binding.channel, &binding.options).await?;
        streams.push(deliveries.map(move |item| (index, item)).boxed());
    }

    Ok(futures::stream::select_all(streams))
}
