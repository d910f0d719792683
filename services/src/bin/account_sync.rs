//! Account sync service.
//!
//! Follows the `account_info` broadcast and maintains `account_projections`.

use conference_projections::PostgresAccountStore;
use conference_services::app;
use conference_services::attendees::{AccountSyncSettings, account_projection, account_sync_consumer};
use conference_services::config::Config;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    app::init_tracing("account_sync=info,conference_runtime=info,conference_projections=info");

    let config = Config::from_env()?;
    info!(
        broker = %config.broker.host,
        channel = %config.broker.account_channel,
        conflict_policy = %config.projection.conflict_policy,
        "Configuration loaded"
    );
    let _metrics = app::start_metrics(&config.metrics)?;

    let store = PostgresAccountStore::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    info!("Account store ready");

    let projection = account_projection(store, &config.projection);
    let settings = AccountSyncSettings::from_config(&config);

    let shutdown = app::shutdown_on_ctrl_c();
    let bus = app::event_bus(&config.broker)?;
    account_sync_consumer(bus, projection, settings, shutdown.subscribe())
        .run()
        .await?;

    info!("Account sync stopped");
    Ok(())
}
