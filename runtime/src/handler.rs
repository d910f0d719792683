//! Handlers invoked by [`EventConsumer`](crate::consumer::EventConsumer) for
//! each delivery.

use async_trait::async_trait;
use conference_core::event::EventError;
use conference_core::event_bus::Delivery;
use conference_core::projection::ProjectionError;
use thiserror::Error;

/// Why a handler could not process a delivery.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The payload did not decode.
    #[error(transparent)]
    Decode(#[from] EventError),

    /// A projection write failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// The delivery arrived on a channel the handler does not serve.
    #[error("No route for channel '{0}'")]
    Unroutable(String),

    /// A side effect (sending mail, calling another service) failed.
    #[error("Side effect failed: {0}")]
    SideEffect(String),
}

/// Processes one delivery.
///
/// Called sequentially by the consumer: the next delivery is not handed over
/// until this one returns. Returning an error stops the consumer; the delivery
/// is left unacknowledged.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the delivery could not be processed.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}
