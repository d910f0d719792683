//! Routing and acknowledgment behavior of the in-memory broker.

#![allow(clippy::unwrap_used)]

use conference_core::channel::Channel;
use conference_core::event_bus::{AckMode, EventBus, EventBusError, SubscribeOptions};
use conference_testing::InMemoryEventBus;
use futures::StreamExt;
use std::time::Duration;

async fn next_payload(stream: &mut conference_core::event_bus::DeliveryStream) -> Vec<u8> {
    let mut delivery = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    delivery.ack().await.unwrap();
    delivery.payload().to_vec()
}

async fn nothing_within(stream: &mut conference_core::event_bus::DeliveryStream, wait: Duration) -> bool {
    tokio::time::timeout(wait, stream.next()).await.is_err()
}

#[tokio::test]
async fn broadcast_fans_out_to_every_subscriber() {
    let bus = InMemoryEventBus::new();
    let channel = Channel::broadcast("account_info");

    let first = bus.connect().await.unwrap();
    let second = bus.connect().await.unwrap();
    first.declare(&channel).await.unwrap();
    second.declare(&channel).await.unwrap();
    let mut first_stream = first.subscribe(&channel, &SubscribeOptions::default()).await.unwrap();
    let mut second_stream = second.subscribe(&channel, &SubscribeOptions::default()).await.unwrap();

    bus.publish_raw(&channel, b"m1").await.unwrap();

    assert_eq!(next_payload(&mut first_stream).await, b"m1");
    assert_eq!(next_payload(&mut second_stream).await, b"m1");
    assert!(nothing_within(&mut first_stream, Duration::from_millis(20)).await);
    assert!(nothing_within(&mut second_stream, Duration::from_millis(20)).await);
}

#[tokio::test]
async fn ephemeral_broadcast_subscription_sees_no_backlog() {
    let bus = InMemoryEventBus::new();
    let channel = Channel::broadcast("account_info");

    bus.publish_raw(&channel, b"before").await.unwrap();
    assert_eq!(bus.dropped(), 1);

    let connection = bus.connect().await.unwrap();
    let mut stream = connection.subscribe(&channel, &SubscribeOptions::default()).await.unwrap();
    assert!(nothing_within(&mut stream, Duration::from_millis(20)).await);

    bus.publish_raw(&channel, b"after").await.unwrap();
    assert_eq!(next_payload(&mut stream).await, b"after");
}

#[tokio::test]
async fn durable_broadcast_group_keeps_messages_while_away() {
    let bus = InMemoryEventBus::new();
    let channel = Channel::broadcast("account_info");
    let options = SubscribeOptions::default().with_group("attendees");

    let connection = bus.connect().await.unwrap();
    connection.declare(&channel).await.unwrap();
    drop(connection.subscribe(&channel, &options).await.unwrap());
    connection.close().await.unwrap();

    bus.publish_raw(&channel, b"while-away").await.unwrap();

    let connection = bus.connect().await.unwrap();
    let mut stream = connection.subscribe(&channel, &options).await.unwrap();
    assert_eq!(next_payload(&mut stream).await, b"while-away");
}

#[tokio::test]
async fn point_to_point_consumers_compete() {
    let bus = InMemoryEventBus::new();
    let queue = Channel::point_to_point("presentation_approvals");

    let first = bus.connect().await.unwrap();
    let second = bus.connect().await.unwrap();
    first.declare(&queue).await.unwrap();
    let mut first_stream = first.subscribe(&queue, &SubscribeOptions::default()).await.unwrap();
    let mut second_stream = second.subscribe(&queue, &SubscribeOptions::default()).await.unwrap();

    for i in 0..10 {
        first.publish(&queue, format!("m{i}").as_bytes()).await.unwrap();
    }

    let mut received = Vec::new();
    loop {
        tokio::select! {
            Some(Ok(mut delivery)) = first_stream.next() => {
                delivery.ack().await.unwrap();
                received.push(delivery.payload().to_vec());
            }
            Some(Ok(mut delivery)) = second_stream.next() => {
                delivery.ack().await.unwrap();
                received.push(delivery.payload().to_vec());
            }
            () = tokio::time::sleep(Duration::from_millis(50)) => break,
        }
    }

    received.sort();
    let mut expected: Vec<Vec<u8>> = (0..10).map(|i| format!("m{i}").into_bytes()).collect();
    expected.sort();
    assert_eq!(received, expected);
    assert_eq!(bus.pending(&queue), 0);
}

#[tokio::test]
async fn point_to_point_queue_holds_messages_until_a_consumer_attaches() {
    let bus = InMemoryEventBus::new();
    let queue = Channel::point_to_point("presentation_rejections");

    let publisher = bus.connect().await.unwrap();
    publisher.declare(&queue).await.unwrap();
    publisher.publish(&queue, b"queued").await.unwrap();
    publisher.close().await.unwrap();
    assert_eq!(bus.pending(&queue), 1);

    let consumer = bus.connect().await.unwrap();
    let mut stream = consumer.subscribe(&queue, &SubscribeOptions::default()).await.unwrap();
    assert_eq!(next_payload(&mut stream).await, b"queued");
}

#[tokio::test]
async fn crash_before_ack_loses_message_when_acked_on_delivery() {
    let bus = InMemoryEventBus::new();
    let queue = Channel::point_to_point("presentation_approvals");
    bus.publish_raw(&queue, b"m1").await.unwrap();

    let connection = bus.connect().await.unwrap();
    let mut stream = connection
        .subscribe(&queue, &SubscribeOptions::new(AckMode::OnDelivery))
        .await
        .unwrap();
    let delivery = stream.next().await.unwrap().unwrap();
    assert!(!delivery.needs_ack());

    // crash: drop everything without processing
    drop(delivery);
    drop(stream);
    drop(connection);

    assert_eq!(bus.pending(&queue), 0);
    assert_eq!(bus.unacked(&queue), 0);
}

#[tokio::test]
async fn crash_before_ack_redelivers_when_acked_after_processing() {
    let bus = InMemoryEventBus::new();
    let queue = Channel::point_to_point("presentation_approvals");
    bus.publish_raw(&queue, b"m1").await.unwrap();

    let connection = bus.connect().await.unwrap();
    let mut stream = connection
        .subscribe(&queue, &SubscribeOptions::new(AckMode::AfterProcessing))
        .await
        .unwrap();
    let delivery = stream.next().await.unwrap().unwrap();
    assert!(delivery.needs_ack());
    assert_eq!(bus.unacked(&queue), 1);

    drop(delivery);
    drop(stream);
    drop(connection);
    assert_eq!(bus.pending(&queue), 1);

    let restarted = bus.connect().await.unwrap();
    let mut stream = restarted
        .subscribe(&queue, &SubscribeOptions::new(AckMode::AfterProcessing))
        .await
        .unwrap();
    let mut delivery = stream.next().await.unwrap().unwrap();
    assert_eq!(delivery.payload(), b"m1");
    assert!(delivery.is_redelivered());
    delivery.ack().await.unwrap();
    assert_eq!(bus.unacked(&queue), 0);
}

#[tokio::test]
async fn unreachable_broker_refuses_connections() {
    let bus = InMemoryEventBus::new();
    bus.set_reachable(false);

    let err = bus.connect().await.err().unwrap();
    assert!(matches!(err, EventBusError::ConnectionFailed(_)));
    assert_eq!(bus.connect_attempts(), 1);
}

#[tokio::test]
async fn disconnect_ends_streams_with_an_error() {
    let bus = InMemoryEventBus::new();
    let channel = Channel::broadcast("account_info");
    let connection = bus.connect().await.unwrap();
    connection.declare(&channel).await.unwrap();
    let mut stream = connection.subscribe(&channel, &SubscribeOptions::default()).await.unwrap();

    bus.disconnect_all();

    assert!(matches!(
        stream.next().await,
        Some(Err(EventBusError::ConnectionClosed(_)))
    ));
    assert!(stream.next().await.is_none());
    assert!(connection.publish(&channel, b"x").await.is_err());
    assert_eq!(bus.open_connections(), 0);
}

#[tokio::test]
async fn undeclared_point_to_point_publish_is_dropped() {
    let bus = InMemoryEventBus::new();
    let queue = Channel::point_to_point("nobody_declared_this");
    let connection = bus.connect().await.unwrap();

    connection.publish(&queue, b"lost").await.unwrap();

    assert_eq!(bus.dropped(), 1);
    assert!(!bus.is_declared(&queue));
}
