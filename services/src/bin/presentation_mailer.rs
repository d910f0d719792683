//! Presentation mailer.
//!
//! Consumes approval and rejection events and emails the presenter. Several
//! instances share the queues; each event is handled by one of them.

use conference_services::app;
use conference_services::config::Config;
use conference_services::mailer::{
    LogNotifier, MailerSettings, Notifier, SmtpNotifier, presentation_mailer_consumer,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    app::init_tracing("presentation_mailer=info,conference_runtime=info,conference_services=info");

    let config = Config::from_env()?;
    info!(
        broker = %config.broker.host,
        approvals = %config.broker.approvals_channel,
        rejections = %config.broker.rejections_channel,
        group = %config.broker.mailer_group,
        ack_mode = %config.broker.ack_mode,
        "Configuration loaded"
    );
    let _metrics = app::start_metrics(&config.metrics)?;

    let notifier: Arc<dyn Notifier> = match SmtpNotifier::from_config(&config.smtp) {
        Some(smtp) => {
            info!(host = ?config.smtp.host, port = config.smtp.port, "Sending mail via SMTP");
            Arc::new(smtp)
        }
        None => {
            warn!("SMTP_HOST not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let settings = MailerSettings::from_config(&config);

    let shutdown = app::shutdown_on_ctrl_c();
    let bus = app::event_bus(&config.broker)?;
    presentation_mailer_consumer(bus, notifier, settings, shutdown.subscribe())
        .run()
        .await?;

    info!("Presentation mailer stopped");
    Ok(())
}
