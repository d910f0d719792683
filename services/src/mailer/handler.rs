use super::{Notification, Notifier};
use crate::config::{Config, DEFAULT_MAILER_GROUP, DEFAULT_SENDER};
use async_trait::async_trait;
use conference_core::decision::{DecisionChannels, DecisionEvent};
use conference_core::event::Event;
use conference_core::event_bus::{AckMode, Delivery, EventBus, SubscribeOptions};
use conference_runtime::{ConnectionManager, EventConsumer, EventHandler, HandlerError, RetryPolicy};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Sends the notification matching the queue a decision arrived on.
pub struct DecisionNotificationHandler {
    channels: DecisionChannels,
    notifier: Arc<dyn Notifier>,
    sender: String,
}

impl DecisionNotificationHandler {
    /// Handler for `channels`, sending from `sender`.
    #[must_use]
    pub fn new(channels: DecisionChannels, notifier: Arc<dyn Notifier>, sender: impl Into<String>) -> Self {
        Self {
            channels,
            notifier,
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl EventHandler for DecisionNotificationHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let decision = self
            .channels
            .decision_for(delivery.channel())
            .ok_or_else(|| HandlerError::Unroutable(delivery.channel().name().to_string()))?;
        let event = DecisionEvent::from_bytes(delivery.payload())?;

        let notification = Notification::for_decision(decision, &event, &self.sender);
        self.notifier.send(&notification).await?;

        tracing::info!(
            decision = %decision,
            recipient = %notification.recipient,
            title = %event.title,
            redelivered = delivery.is_redelivered(),
            "Decision notification delivered"
        );
        Ok(())
    }
}

/// Settings for [`presentation_mailer_consumer`].
#[derive(Debug, Clone)]
pub struct MailerSettings {
    /// Approval and rejection queues
    pub channels: DecisionChannels,
    /// Group shared by competing mailer instances
    pub group: String,
    /// When deliveries are acknowledged
    pub ack_mode: AckMode,
    /// Connection retry policy
    pub retry_policy: RetryPolicy,
    /// `From` address
    pub sender: String,
}

impl Default for MailerSettings {
    fn default() -> Self {
        Self {
            channels: DecisionChannels::default(),
            group: DEFAULT_MAILER_GROUP.to_string(),
            ack_mode: AckMode::default(),
            retry_policy: RetryPolicy::default(),
            sender: DEFAULT_SENDER.to_string(),
        }
    }
}

impl MailerSettings {
    /// Settings from the broker and SMTP configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            channels: config.broker.decision_channels(),
            group: config.broker.mailer_group.clone(),
            ack_mode: config.broker.ack_mode,
            retry_policy: config.broker.retry_policy(),
            sender: config.smtp.sender.clone(),
        }
    }
}

/// Build the mailer consumer: both decision queues, one handler, one
/// connection.
#[must_use]
pub fn presentation_mailer_consumer(
    bus: Arc<dyn EventBus>,
    notifier: Arc<dyn Notifier>,
    settings: MailerSettings,
    shutdown: broadcast::Receiver<()>,
) -> EventConsumer {
    let manager = ConnectionManager::new("presentation-mailer", bus, settings.retry_policy);
    let options = SubscribeOptions::new(settings.ack_mode).with_group(settings.group);
    let handler: Arc<dyn EventHandler> = Arc::new(DecisionNotificationHandler::new(
        settings.channels.clone(),
        notifier,
        settings.sender,
    ));

    settings
        .channels
        .all()
        .into_iter()
        .fold(EventConsumer::new("presentation-mailer", manager, shutdown), |consumer, channel| {
            consumer.bind(channel.clone(), options.clone(), Arc::clone(&handler))
        })
}
