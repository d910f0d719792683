//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! These tests use testcontainers to start Kafka and check the channel
//! mapping end to end:
//! - point-to-point queues keep messages published before anyone subscribes
//! - consumers of one queue compete for its messages
//! - an ephemeral broadcast subscription sees no backlog
//! - an uncommitted delivery is redelivered to the next consumer in the group
//! - queue topics get several partitions, broadcast topics one
//! - an ephemeral subscription's group is removed when the subscriber leaves
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take tens of seconds each:
//! ```bash
//! cargo test -p conference-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use conference_core::channel::Channel;
use conference_core::event_bus::{
    AckMode, BusConnection, DeliveryStream, EventBus, SubscribeOptions,
};
use conference_redpanda::RedpandaEventBus;
use futures::StreamExt;
use rdkafka::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use std::collections::HashSet;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, RedpandaEventBus) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let bus = RedpandaEventBus::builder()
        .brokers(format!("{host}:{port}"))
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to configure bus");

    for _ in 0..60 {
        if let Ok(connection) = bus.connect().await {
            let _ = connection.close().await;
            return (kafka, bus);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Kafka did not become reachable");
}

async fn next_payload(stream: &mut DeliveryStream) -> Option<Vec<u8>> {
    let delivery = tokio::time::timeout(Duration::from_secs(20), stream.next())
        .await
        .ok()??;
    let mut delivery = delivery.expect("delivery error");
    delivery.ack().await.expect("ack failed");
    Some(delivery.payload().to_vec())
}

async fn declared(bus: &RedpandaEventBus, channel: &Channel) -> Box<dyn BusConnection> {
    let connection = bus.connect().await.expect("connect");
    connection.declare(channel).await.expect("declare");
    connection.declare(channel).await.expect("declare is idempotent");
    connection
}

#[tokio::test]
#[ignore]
async fn queue_keeps_messages_until_a_consumer_attaches() {
    let (_kafka, bus) = start_kafka().await;
    let queue = Channel::point_to_point("presentation_approvals");

    let publisher = declared(&bus, &queue).await;
    publisher
        .publish(&queue, br#"{"presenter_name":"Pat","presenter_email":"p@y.com","title":"Intro"}"#)
        .await
        .expect("publish");
    publisher.close().await.expect("close");

    let consumer = declared(&bus, &queue).await;
    let mut stream = consumer
        .subscribe(&queue, &SubscribeOptions::default())
        .await
        .expect("subscribe");

    let payload = next_payload(&mut stream).await.expect("queued message");
    assert!(String::from_utf8(payload).unwrap().contains("Intro"));
}

#[tokio::test]
#[ignore]
async fn queue_consumers_compete() {
    let (_kafka, bus) = start_kafka().await;
    let queue = Channel::point_to_point("presentation_rejections");
    let options = SubscribeOptions::default().with_group("presentation-mailer");

    let first = declared(&bus, &queue).await;
    let second = declared(&bus, &queue).await;
    let mut first_stream = first.subscribe(&queue, &options).await.expect("subscribe");
    let mut second_stream = second.subscribe(&queue, &options).await.expect("subscribe");
    tokio::time::sleep(Duration::from_secs(5)).await;

    for i in 0..10 {
        first.publish(&queue, format!("m{i}").as_bytes()).await.expect("publish");
    }

    let mut seen = Vec::new();
    loop {
        tokio::select! {
            Some(payload) = next_payload(&mut first_stream) => seen.push(payload),
            Some(payload) = next_payload(&mut second_stream) => seen.push(payload),
            else => break,
        }
        if seen.len() == 10 {
            break;
        }
    }

    let unique: HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 10);
    assert_eq!(unique.len(), 10);
}

#[tokio::test]
#[ignore]
async fn ephemeral_broadcast_skips_backlog() {
    let (_kafka, bus) = start_kafka().await;
    let channel = Channel::broadcast("account_info");

    let publisher = declared(&bus, &channel).await;
    publisher.publish(&channel, b"before").await.expect("publish");

    let subscriber = declared(&bus, &channel).await;
    let mut stream = subscriber
        .subscribe(&channel, &SubscribeOptions::default())
        .await
        .expect("subscribe");
    tokio::time::sleep(Duration::from_secs(5)).await;

    publisher.publish(&channel, b"after").await.expect("publish");

    assert_eq!(next_payload(&mut stream).await.as_deref(), Some(&b"after"[..]));
}

#[tokio::test]
#[ignore]
async fn uncommitted_delivery_is_redelivered() {
    let (_kafka, bus) = start_kafka().await;
    let queue = Channel::point_to_point("redelivery");
    let options = SubscribeOptions::new(AckMode::AfterProcessing);

    let connection = declared(&bus, &queue).await;
    connection.publish(&queue, b"once").await.expect("publish");

    let mut stream = connection.subscribe(&queue, &options).await.expect("subscribe");
    let delivery = tokio::time::timeout(Duration::from_secs(20), stream.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("delivery error");
    assert!(delivery.needs_ack());
    drop(delivery);
    drop(stream);
    connection.close().await.expect("close");

    let restarted = declared(&bus, &queue).await;
    let mut stream = restarted.subscribe(&queue, &options).await.expect("subscribe");
    assert_eq!(next_payload(&mut stream).await.as_deref(), Some(&b"once"[..]));
}

fn metadata_client(bus: &RedpandaEventBus) -> BaseConsumer {
    ClientConfig::new()
        .set("bootstrap.servers", bus.brokers())
        .create()
        .expect("metadata client")
}

fn group_names(client: &BaseConsumer) -> Vec<String> {
    client
        .fetch_group_list(None, Duration::from_secs(10))
        .expect("group list")
        .groups()
        .iter()
        .map(|group| group.name().to_string())
        .collect()
}

#[tokio::test]
#[ignore]
async fn queue_topics_are_partitioned_for_competing_mailers() {
    let (_kafka, bus) = start_kafka().await;
    let queue = Channel::point_to_point("presentation_approvals");
    let broadcast = Channel::broadcast("account_info");

    let connection = declared(&bus, &queue).await;
    connection.declare(&broadcast).await.expect("declare");

    let client = metadata_client(&bus);
    let partitions = |topic: &str| {
        client
            .fetch_metadata(Some(topic), Duration::from_secs(10))
            .expect("metadata")
            .topics()[0]
            .partitions()
            .len()
    };
    assert_eq!(partitions("presentation_approvals"), 4);
    assert_eq!(partitions("account_info"), 1);
}

#[tokio::test]
#[ignore]
async fn ephemeral_group_is_removed_after_the_subscriber_leaves() {
    let (_kafka, bus) = start_kafka().await;
    let channel = Channel::broadcast("account_info");

    let connection = declared(&bus, &channel).await;
    let mut stream = connection
        .subscribe(&channel, &SubscribeOptions::default())
        .await
        .expect("subscribe");
    connection.publish(&channel, b"hello").await.expect("publish");
    tokio::time::sleep(Duration::from_secs(5)).await;
    connection.publish(&channel, b"again").await.expect("publish");
    assert!(next_payload(&mut stream).await.is_some());

    let client = metadata_client(&bus);
    let is_ephemeral = |name: &String| name.starts_with("conference-account_info-");
    assert!(group_names(&client).iter().any(is_ephemeral));

    drop(stream);
    let mut remaining = true;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        remaining = group_names(&client).iter().any(is_ephemeral);
        if !remaining {
            break;
        }
    }
    assert!(!remaining, "ephemeral group left behind");
}
