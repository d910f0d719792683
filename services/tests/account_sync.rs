//! Account sync against the in-memory broker.

#![allow(clippy::unwrap_used)]

use conference_core::channel::{ACCOUNT_INFO, Channel};
use conference_core::event_bus::AckMode;
use conference_projections::AccountInfoProjection;
use conference_runtime::{ConsumerError, HandlerError, RetryPolicy};
use conference_services::attendees::{
    AccountSyncSettings, BroadcastSubscription, account_projection, account_sync_consumer,
};
use conference_services::config::Config;
use conference_testing::{InMemoryAccountStore, InMemoryEventBus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

fn channel() -> Channel {
    Channel::broadcast(ACCOUNT_INFO)
}

fn snapshot(email: &str, is_active: bool, updated: &str) -> Vec<u8> {
    serde_json::json!({
        "first_name": "A",
        "last_name": "B",
        "email": email,
        "is_active": is_active,
        "updated": updated,
    })
    .to_string()
    .into_bytes()
}

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

struct Running {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<(), ConsumerError>>,
}

impl Running {
    async fn stop(self) -> Result<(), ConsumerError> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
    }
}

fn start(bus: &InMemoryEventBus, store: &InMemoryAccountStore, subscription: BroadcastSubscription) -> Running {
    let (shutdown, receiver) = broadcast::channel(1);
    let settings = AccountSyncSettings {
        subscription,
        retry_policy: RetryPolicy::fixed(Duration::from_millis(10)),
        ..AccountSyncSettings::default()
    };
    let consumer = account_sync_consumer(
        Arc::new(bus.clone()),
        AccountInfoProjection::new(store.clone()),
        settings,
        receiver,
    );
    Running {
        shutdown,
        task: consumer.spawn(),
    }
}

#[tokio::test]
async fn activation_then_deactivation() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();
    let running = start(&bus, &store, BroadcastSubscription::Ephemeral);
    eventually(|| bus.subscriber_count(&channel()) == 1).await;

    bus.publish_raw(&channel(), &snapshot("a@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    eventually(|| store.contains("a@x.com")).await;

    let row = store.row("a@x.com").unwrap();
    assert_eq!(row.first_name, "A");
    assert_eq!(row.last_name, "B");
    assert!(row.is_active);
    assert_eq!(row.updated.to_rfc3339(), "2024-01-01T00:00:00+00:00");

    bus.publish_raw(&channel(), &snapshot("a@x.com", false, "2024-01-02T00:00:00"))
        .await
        .unwrap();
    eventually(|| !store.contains("a@x.com")).await;

    running.stop().await.unwrap();
}

#[tokio::test]
async fn every_subscriber_gets_each_snapshot() {
    let bus = InMemoryEventBus::new();
    let first = InMemoryAccountStore::new();
    let second = InMemoryAccountStore::new();
    let first_running = start(&bus, &first, BroadcastSubscription::Ephemeral);
    let second_running = start(&bus, &second, BroadcastSubscription::Ephemeral);
    eventually(|| bus.subscriber_count(&channel()) == 2).await;

    bus.publish_raw(&channel(), &snapshot("a@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();

    eventually(|| first.contains("a@x.com") && second.contains("a@x.com")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(first.writes(), 1);
    assert_eq!(second.writes(), 1);

    first_running.stop().await.unwrap();
    second_running.stop().await.unwrap();
}

#[tokio::test]
async fn ephemeral_subscription_misses_snapshots_sent_while_down() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();

    bus.publish_raw(&channel(), &snapshot("early@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();

    let running = start(&bus, &store, BroadcastSubscription::Ephemeral);
    eventually(|| bus.subscriber_count(&channel()) == 1).await;
    bus.publish_raw(&channel(), &snapshot("late@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    eventually(|| store.contains("late@x.com")).await;

    assert!(!store.contains("early@x.com"));
    running.stop().await.unwrap();
}

#[tokio::test]
async fn durable_subscription_catches_up_after_restart() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();
    let durable = || BroadcastSubscription::Durable {
        group: "attendees".to_string(),
    };

    let running = start(&bus, &store, durable());
    eventually(|| bus.subscriber_count(&channel()) == 1).await;
    running.stop().await.unwrap();
    assert_eq!(bus.subscriber_count(&channel()), 0);

    bus.publish_raw(&channel(), &snapshot("a@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    assert_eq!(bus.pending(&channel()), 1);

    let running = start(&bus, &store, durable());
    eventually(|| store.contains("a@x.com")).await;
    assert_eq!(bus.pending(&channel()), 0);
    running.stop().await.unwrap();
}

#[tokio::test]
async fn reconnects_after_broker_restart() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();
    let running = start(&bus, &store, BroadcastSubscription::Ephemeral);
    eventually(|| bus.subscriber_count(&channel()) == 1).await;

    bus.set_reachable(false);
    bus.disconnect_all();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.subscriber_count(&channel()), 0);
    assert!(bus.connect_attempts() > 2);

    bus.set_reachable(true);
    eventually(|| bus.subscriber_count(&channel()) == 1).await;
    bus.publish_raw(&channel(), &snapshot("a@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    eventually(|| store.contains("a@x.com")).await;

    running.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_snapshot_stops_the_consumer() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();
    let running = start(&bus, &store, BroadcastSubscription::Ephemeral);
    eventually(|| bus.subscriber_count(&channel()) == 1).await;

    bus.publish_raw(&channel(), br#"{"email":"a@x.com"}"#).await.unwrap();

    let result = tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConsumerError::Handler { source: HandlerError::Decode(_), .. })
    ));
    assert!(store.is_empty());
}

fn config(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

#[tokio::test]
async fn configured_newest_updated_wins_ignores_late_older_snapshot() {
    let config = config(&[
        ("ACCOUNT_CONFLICT_POLICY", "newest-updated-wins"),
        ("BROKER_RETRY_INTERVAL_MS", "10"),
    ]);
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();
    let (shutdown, receiver) = broadcast::channel(1);
    let task = account_sync_consumer(
        Arc::new(bus.clone()),
        account_projection(store.clone(), &config.projection),
        AccountSyncSettings::from_config(&config),
        receiver,
    )
    .spawn();
    eventually(|| bus.subscriber_count(&channel()) == 1).await;

    bus.publish_raw(&channel(), &snapshot("a@x.com", true, "2024-02-01T00:00:00"))
        .await
        .unwrap();
    bus.publish_raw(&channel(), &snapshot("a@x.com", false, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    bus.publish_raw(&channel(), &snapshot("marker@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    eventually(|| store.contains("marker@x.com")).await;

    let row = store.row("a@x.com").unwrap();
    assert_eq!(row.updated.to_rfc3339(), "2024-02-01T00:00:00+00:00");
    shutdown.send(()).unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn snapshot_in_flight_during_a_crash_is_lost_by_default() {
    let bus = InMemoryEventBus::new();
    let store = InMemoryAccountStore::new();
    let durable = || BroadcastSubscription::Durable {
        group: "attendees".to_string(),
    };
    assert_eq!(AccountSyncSettings::default().ack_mode, AckMode::OnDelivery);

    let running = start(&bus, &store, durable());
    eventually(|| bus.subscriber_count(&channel()) == 1).await;
    store.set_unavailable(true);
    bus.publish_raw(&channel(), &snapshot("a@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();

    let result = tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConsumerError::Handler { source: HandlerError::Projection(_), .. })
    ));
    assert_eq!(bus.pending(&channel()), 0);

    store.set_unavailable(false);
    let restarted = start(&bus, &store, durable());
    eventually(|| bus.subscriber_count(&channel()) == 1).await;
    bus.publish_raw(&channel(), &snapshot("b@x.com", true, "2024-01-01T00:00:00"))
        .await
        .unwrap();
    eventually(|| store.contains("b@x.com")).await;

    assert!(!store.contains("a@x.com"));
    restarted.stop().await.unwrap();
}
