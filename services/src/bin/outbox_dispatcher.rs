//! Decision outbox dispatcher.
//!
//! Publishes decisions the monolith stored in `decision_outbox`.

use conference_postgres::PostgresDecisionOutbox;
use conference_services::app;
use conference_services::config::Config;
use conference_services::presentations::OutboxDispatcher;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    app::init_tracing("outbox_dispatcher=info,conference_runtime=info,conference_services=info");

    let config = Config::from_env()?;
    info!(
        broker = %config.broker.host,
        batch_size = config.outbox.batch_size,
        poll_interval_ms = config.outbox.poll_interval_ms,
        "Configuration loaded"
    );
    let _metrics = app::start_metrics(&config.metrics)?;
    if !config.outbox.enabled {
        warn!("DECISION_OUTBOX is off, only entries left from earlier runs will be published");
    }

    let outbox = PostgresDecisionOutbox::connect(&config.database.url, config.database.max_connections).await?;
    outbox.migrate().await?;
    info!(pending = outbox.count_pending().await?, "Decision outbox ready");

    let shutdown = app::shutdown_on_ctrl_c();
    let bus = app::event_bus(&config.broker)?;
    OutboxDispatcher::new(Arc::new(outbox), bus, config.broker.retry_policy())
        .with_channels(config.broker.decision_channels())
        .with_batch_size(config.outbox.batch_size)
        .with_poll_interval(config.outbox.poll_interval())
        .run(shutdown.subscribe())
        .await;

    Ok(())
}
