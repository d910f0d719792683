//! Account sync: keeps the attendees service's copy of identity accounts.
//!
//! Subscribes to the `account_info` broadcast and feeds every snapshot to an
//! [`AccountInfoProjection`]. By default the subscription is private and
//! ephemeral, so snapshots broadcast while the service is down are never
//! seen. A durable group keeps them for the next start instead.

use crate::config::{Config, ProjectionConfig};
use async_trait::async_trait;
use conference_core::account::{AccountSnapshotEvent, AccountStore};
use conference_core::channel::{ACCOUNT_INFO, Channel};
use conference_core::event::Event;
use conference_core::event_bus::{AckMode, Delivery, EventBus, SubscribeOptions};
use conference_projections::AccountInfoProjection;
use conference_runtime::{ConnectionManager, EventConsumer, EventHandler, HandlerError, RetryPolicy};
use std::sync::Arc;
use tokio::sync::broadcast;

/// How the account-sync consumer subscribes to the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BroadcastSubscription {
    /// Fresh private subscription per connection; no backlog.
    #[default]
    Ephemeral,
    /// Named subscription that keeps messages while disconnected.
    Durable {
        /// Subscription group
        group: String,
    },
}

impl BroadcastSubscription {
    /// Subscribe options for this subscription.
    #[must_use]
    pub fn options(&self, ack_mode: AckMode) -> SubscribeOptions {
        let options = SubscribeOptions::new(ack_mode);
        match self {
            Self::Ephemeral => options,
            Self::Durable { group } => options.with_group(group.as_str()),
        }
    }
}

/// Decodes account snapshots and applies them to the projection.
pub struct AccountInfoHandler<S> {
    projection: AccountInfoProjection<S>,
}

impl<S: AccountStore> AccountInfoHandler<S> {
    /// Wrap a projection.
    #[must_use]
    pub const fn new(projection: AccountInfoProjection<S>) -> Self {
        Self { projection }
    }

    /// The wrapped projection.
    #[must_use]
    pub const fn projection(&self) -> &AccountInfoProjection<S> {
        &self.projection
    }
}

#[async_trait]
impl<S: AccountStore + 'static> EventHandler for AccountInfoHandler<S> {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let snapshot = AccountSnapshotEvent::from_bytes(delivery.payload())?;
        tracing::debug!(
            email = %snapshot.email,
            is_active = snapshot.is_active,
            redelivered = delivery.is_redelivered(),
            "Account snapshot received"
        );
        self.projection.apply(&snapshot).await?;
        Ok(())
    }
}

/// Settings for [`account_sync_consumer`].
#[derive(Debug, Clone)]
pub struct AccountSyncSettings {
    /// Broadcast channel to follow
    pub channel: Channel,
    /// Ephemeral or durable subscription
    pub subscription: BroadcastSubscription,
    /// When deliveries are acknowledged
    pub ack_mode: AckMode,
    /// Connection retry policy
    pub retry_policy: RetryPolicy,
}

impl AccountSyncSettings {
    /// Settings taken from the broker and projection sections of `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel: config.broker.account_channel(),
            subscription: config.projection.subscription.clone(),
            ack_mode: config.broker.ack_mode,
            retry_policy: config.broker.retry_policy(),
        }
    }
}

impl Default for AccountSyncSettings {
    fn default() -> Self {
        Self {
            channel: Channel::broadcast(ACCOUNT_INFO),
            subscription: BroadcastSubscription::default(),
            ack_mode: AckMode::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Projection over `store` using the configured conflict policy.
#[must_use]
pub fn account_projection<S: AccountStore>(store: S, config: &ProjectionConfig) -> AccountInfoProjection<S> {
    AccountInfoProjection::new(store).with_policy(config.conflict_policy)
}

/// Build the account-sync consumer.
#[must_use]
pub fn account_sync_consumer<S: AccountStore + 'static>(
    bus: Arc<dyn EventBus>,
    projection: AccountInfoProjection<S>,
    settings: AccountSyncSettings,
    shutdown: broadcast::Receiver<()>,
) -> EventConsumer {
    let manager = ConnectionManager::new("account-sync", bus, settings.retry_policy);
    let options = settings.subscription.options(settings.ack_mode);

    EventConsumer::new("account-sync", manager, shutdown).bind(
        settings.channel,
        options,
        Arc::new(AccountInfoHandler::new(projection)),
    )
}
