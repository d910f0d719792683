//! Process setup shared by the binaries.

use crate::config::{BrokerConfig, Config, MetricsConfig};
use crate::presentations::DecisionDispatch;
use conference_core::event_bus::EventBus;
use conference_postgres::PostgresDecisionOutbox;
use conference_redpanda::RedpandaEventBus;
use conference_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins; otherwise `default_filter` is used.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Kafka-protocol event bus for the configured broker.
///
/// # Errors
///
/// Returns an error if the broker address is empty.
pub fn event_bus(config: &BrokerConfig) -> anyhow::Result<Arc<dyn EventBus>> {
    let bus = RedpandaEventBus::builder()
        .brokers(config.host.as_str())
        .queue_partitions(config.queue_partitions)
        .build()?;
    Ok(Arc::new(bus))
}

/// How approve and reject hand decisions to the broker.
///
/// With `DECISION_OUTBOX` set, decisions go to the Postgres outbox (connected
/// and migrated here) for the outbox dispatcher to publish. Otherwise each
/// transition publishes directly and waits for the broker.
///
/// # Errors
///
/// Returns an error if the broker address is empty, or if the outbox is
/// enabled and the database cannot be reached or migrated.
pub async fn decision_dispatch(config: &Config) -> anyhow::Result<DecisionDispatch> {
    if !config.outbox.enabled {
        return Ok(DecisionDispatch::direct(event_bus(&config.broker)?, &config.broker));
    }
    let outbox = PostgresDecisionOutbox::connect(&config.database.url, config.database.max_connections).await?;
    outbox.migrate().await?;
    Ok(DecisionDispatch::Outbox(Arc::new(outbox)))
}

/// Start the Prometheus endpoint if an address is configured.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics(config: &MetricsConfig) -> anyhow::Result<Option<MetricsServer>> {
    let Some(addr) = config.addr else {
        return Ok(None);
    };
    let mut server = MetricsServer::new(addr);
    server.start()?;
    Ok(Some(server))
}

/// Shutdown channel fired on Ctrl-C.
///
/// Hand `sender.subscribe()` to each component.
#[must_use]
pub fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (sender, _) = broadcast::channel(1);
    let signal = sender.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        let _ = signal.send(());
    });
    sender
}
