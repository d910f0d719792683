//! Prometheus metrics for broker-facing components.
//!
//! Counters recorded across the workspace:
//! - connection attempts per component
//! - deliveries and handler failures per consumer and channel
//! - decisions published, per decision and dispatch mode
//! - outbox rows dispatched and failed
//!
//! # Example
//!
//! ```rust,no_run
//! use conference_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the global recorder
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        let addr = self.addr;
        tokio::spawn(async move {
            // The exporter's error type carries no printable detail.
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics endpoint stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Handle for rendering, once started.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the server has not been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "broker_connect_attempts_total",
        "Connection attempts made to the broker, successful or not"
    );
    describe_counter!(
        "consumer_deliveries_total",
        "Deliveries handed to consumer handlers"
    );
    describe_counter!(
        "consumer_handler_failures_total",
        "Deliveries whose handler returned an error"
    );
    describe_counter!(
        "decision_events_published_total",
        "Presentation decisions published or queued for publishing"
    );
    describe_counter!(
        "outbox_dispatched_total",
        "Outbox rows published to the broker"
    );
    describe_counter!(
        "outbox_failures_total",
        "Outbox publish attempts that failed"
    );
}
