//! Redpanda broker backend for the Conference GO sync layer.
//!
//! This crate implements the [`EventBus`] and [`BusConnection`] traits from
//! `conference-core` over the Kafka protocol using rdkafka. It works against
//! Redpanda or any Kafka-compatible broker.
//!
//! # Channel Mapping
//!
//! | Operation | Kafka |
//! |---|---|
//! | declare broadcast | create a one-partition topic; "already exists" is success |
//! | declare point-to-point | create a topic with `queue_partitions` partitions (default 4) |
//! | publish | produce one unkeyed record |
//! | broadcast subscribe, no group | fresh consumer group per subscription, `auto.offset.reset=latest` |
//! | broadcast subscribe, group | that group, `earliest` |
//! | point-to-point subscribe | shared group (the channel name unless given), `earliest` |
//! | ack | commit `offset + 1` for the record's partition |
//!
//! A fresh group that starts at `latest` sees only what is published after it
//! joins, which is what an ephemeral fanout subscription gives. The group is
//! deleted again when its subscription ends. A shared group makes its members
//! compete for records, which is what a named queue gives. Members share the
//! load partition by partition, so a queue never has more active consumers
//! than partitions, and ordering only holds within a partition.
//!
//! Joining a group is asynchronous: [`BusConnection::subscribe`] returns before
//! the group has been assigned its partitions. An ephemeral subscription starts
//! at `latest` as of that assignment, so a broadcast published in between is
//! missed, the same as one published while the subscriber was disconnected.
//!
//! # Delivery Semantics
//!
//! Auto-commit is off. With [`AckMode::OnDelivery`] the offset is committed
//! before the delivery is handed over; with [`AckMode::AfterProcessing`] it is
//! committed when the subscriber calls [`Delivery::ack`]. Kafka does not report
//! redelivery, so [`Delivery::is_redelivered`] is always `false` here.
//!
//! # Example
//!
//! ```no_run
//! use conference_core::channel::Channel;
//! use conference_core::event_bus::{EventBus, SubscribeOptions};
//! use conference_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::new("localhost:9092")?;
//! let connection = bus.connect().await?;
//!
//! let queue = Channel::point_to_point("presentation_approvals");
//! connection.declare(&queue).await?;
//! connection.publish(&queue, br#"{"presenter_name":"Pat"}"#).await?;
//!
//! let mut deliveries = connection.subscribe(&queue, &SubscribeOptions::default()).await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let mut delivery = delivery?;
//!     println!("{}", String::from_utf8_lossy(delivery.payload()));
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

use conference_core::channel::{Channel, ChannelKind};
use conference_core::event_bus::{
    AckMode, Acknowledger, BusConnection, BusFuture, Delivery, DeliveryStream, EventBus,
    EventBusError, SubscribeOptions,
};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Kafka-protocol [`EventBus`].
///
/// Holds configuration only. Every [`EventBus::connect`] creates its own
/// producer and admin client, so connections are not shared.
///
/// # Example
///
/// ```no_run
/// use conference_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("redpanda:9092")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedpandaEventBus {
    brokers: String,
    producer_acks: String,
    compression: String,
    timeout: Duration,
    buffer_size: usize,
    group_prefix: String,
    queue_partitions: i32,
}

impl RedpandaEventBus {
    /// Bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if `brokers` is empty.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("message.timeout.ms", self.timeout.as_millis().to_string())
            .set("acks", &self.producer_acks)
            .set("compression.type", &self.compression);
        config
    }

    /// Partition count used when a channel's topic is created.
    fn partitions_for(&self, channel: &Channel) -> i32 {
        match channel.kind() {
            ChannelKind::Broadcast => 1,
            ChannelKind::PointToPoint => self.queue_partitions,
        }
    }

    /// Group used by a subscription, and where a new group starts reading.
    fn group_for(&self, channel: &Channel, options: &SubscribeOptions) -> (String, &'static str) {
        match (channel.kind(), &options.group) {
            (ChannelKind::Broadcast, None) => (
                format!("{}-{}-{}", self.group_prefix, channel.name(), uuid::Uuid::new_v4()),
                "latest",
            ),
            (ChannelKind::Broadcast, Some(group)) => (group.clone(), "earliest"),
            (ChannelKind::PointToPoint, group) => (
                group.clone().unwrap_or_else(|| channel.name().to_string()),
                "earliest",
            ),
        }
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    group_prefix: Option<String>,
    queue_partitions: Option<i32>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers (e.g. `"redpanda:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment level: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Timeout for metadata, admin and produce requests.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deliveries buffered between the Kafka consumer and the subscriber.
    ///
    /// Default: 100. Zero is treated as one.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Prefix of generated group ids for ephemeral broadcast subscriptions.
    ///
    /// Default: `"conference"`
    #[must_use]
    pub fn group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = Some(prefix.into());
        self
    }

    /// Partitions of a newly created point-to-point topic. Caps how many
    /// competing consumers of one queue are active at once.
    ///
    /// Default: 4. Values below one are treated as one.
    #[must_use]
    pub const fn queue_partitions(mut self, partitions: i32) -> Self {
        self.queue_partitions = Some(partitions);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if no brokers are set.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let bus = RedpandaEventBus {
            brokers,
            producer_acks: self.producer_acks.unwrap_or_else(|| "all".to_string()),
            compression: self.compression.unwrap_or_else(|| "none".to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size: self.buffer_size.unwrap_or(100).max(1),
            group_prefix: self.group_prefix.unwrap_or_else(|| "conference".to_string()),
            queue_partitions: self.queue_partitions.unwrap_or(4).max(1),
        };

        tracing::info!(
            brokers = %bus.brokers,
            acks = %bus.producer_acks,
            compression = %bus.compression,
            buffer_size = bus.buffer_size,
            queue_partitions = bus.queue_partitions,
            "RedpandaEventBus configured"
        );

        Ok(bus)
    }
}

impl EventBus for RedpandaEventBus {
    fn connect(&self) -> BusFuture<'_, Box<dyn BusConnection>> {
        Box::pin(async move {
            let producer: FutureProducer = self.producer_config().create().map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;
            let admin: AdminClient<DefaultClientContext> =
                self.producer_config().create().map_err(|e| {
                    EventBusError::ConnectionFailed(format!("Failed to create admin client: {e}"))
                })?;

            // Client creation is lazy; a metadata round trip proves the broker is there.
            let metadata_client = producer.clone();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || metadata_client.client().fetch_metadata(None, timeout))
                .await
                .map_err(|e| EventBusError::ConnectionFailed(format!("Metadata request aborted: {e}")))?
                .map_err(|e| EventBusError::ConnectionFailed(format!("Broker unreachable: {e}")))?;

            let (closed_tx, _) = watch::channel(false);
            tracing::debug!(brokers = %self.brokers, "Connected to broker");

            Ok(Box::new(RedpandaConnection {
                bus: self.clone(),
                producer,
                admin,
                closed: closed_tx,
            }) as Box<dyn BusConnection>)
        })
    }
}

/// One open connection: a producer, an admin client and the consumers created
/// by [`BusConnection::subscribe`].
pub struct RedpandaConnection {
    bus: RedpandaEventBus,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    closed: watch::Sender<bool>,
}

impl RedpandaConnection {
    fn ensure_open(&self) -> Result<(), EventBusError> {
        if *self.closed.borrow() {
            Err(EventBusError::ConnectionClosed("connection closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl BusConnection for RedpandaConnection {
    fn declare(&self, channel: &Channel) -> BusFuture<'_, ()> {
        let channel = channel.clone();
        Box::pin(async move {
            self.ensure_open()?;
            let partitions = self.bus.partitions_for(&channel);
            let topic = NewTopic::new(channel.name(), partitions, TopicReplication::Fixed(1));
            let options = AdminOptions::new().operation_timeout(Some(self.bus.timeout));

            let results = self
                .admin
                .create_topics(&[topic], &options)
                .await
                .map_err(|e| EventBusError::DeclareFailed {
                    channel: channel.name().to_string(),
                    reason: e.to_string(),
                })?;

            for result in results {
                match result {
                    Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                    Err((_, code)) => {
                        return Err(EventBusError::DeclareFailed {
                            channel: channel.name().to_string(),
                            reason: code.to_string(),
                        });
                    }
                }
            }

            tracing::debug!(
                channel = %channel,
                kind = channel.kind().as_str(),
                partitions = partitions,
                "Channel declared"
            );
            Ok(())
        })
    }

    fn publish(&self, channel: &Channel, payload: &[u8]) -> BusFuture<'_, ()> {
        let channel = channel.clone();
        let payload = payload.to_vec();
        Box::pin(async move {
            self.ensure_open()?;
            let record = FutureRecord::<(), Vec<u8>>::to(channel.name()).payload(&payload);

            match self.producer.send(record, Timeout::After(self.bus.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        channel = %channel,
                        partition = partition,
                        offset = offset,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(channel = %channel, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        channel: channel.name().to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(&self, channel: &Channel, options: &SubscribeOptions) -> BusFuture<'_, DeliveryStream> {
        let channel = channel.clone();
        let options = options.clone();
        Box::pin(async move {
            self.ensure_open()?;
            let (group, offset_reset) = self.bus.group_for(&channel, &options);
            let ephemeral = channel.kind() == ChannelKind::Broadcast && options.group.is_none();

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.bus.brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    channel: channel.name().to_string(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[channel.name()])
                .map_err(|e| EventBusError::SubscriptionFailed {
                    channel: channel.name().to_string(),
                    reason: e.to_string(),
                })?;

            tracing::info!(
                channel = %channel,
                group = %group,
                auto_offset_reset = offset_reset,
                ack_mode = %options.ack_mode,
                "Subscribed"
            );

            let (tx, mut rx) = mpsc::channel(self.bus.buffer_size);
            tokio::spawn(forward(
                Arc::new(consumer),
                channel,
                options.ack_mode,
                tx,
                self.closed.subscribe(),
                ephemeral.then(|| (self.bus.clone(), group)),
            ));

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            self.closed.send_replace(true);
            let producer = self.producer.clone();
            let timeout = self.bus.timeout;
            tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| EventBusError::ConnectionClosed(format!("Flush aborted: {e}")))?
                .map_err(|e| EventBusError::ConnectionClosed(format!("Flush failed: {e}")))
        })
    }
}

impl Drop for RedpandaConnection {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

/// Owns one Kafka consumer and forwards its records as deliveries until the
/// connection closes or the subscriber goes away.
///
/// `ephemeral_group` is deleted once the consumer has left it.
async fn forward(
    consumer: Arc<StreamConsumer>,
    channel: Channel,
    ack_mode: AckMode,
    tx: mpsc::Sender<Result<Delivery, EventBusError>>,
    mut closed: watch::Receiver<bool>,
    ephemeral_group: Option<(RedpandaEventBus, String)>,
) {
    use futures::StreamExt;

    let mut records = consumer.stream();

    loop {
        let next = tokio::select! {
            biased;
            () = wait_closed(&mut closed) => break,
            () = tx.closed() => break,
            next = records.next() => next,
        };

        let item = match next {
            Some(Ok(record)) => {
                let payload = record.payload().map(<[u8]>::to_vec).unwrap_or_default();
                let acker = match ack_mode {
                    AckMode::OnDelivery => {
                        if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                            tracing::warn!(channel = %channel, offset = record.offset(), error = %e, "Failed to commit offset");
                        }
                        None
                    }
                    AckMode::AfterProcessing => Some(Box::new(KafkaAcker {
                        consumer: Arc::clone(&consumer),
                        topic: record.topic().to_string(),
                        partition: record.partition(),
                        offset: record.offset(),
                    }) as Box<dyn Acknowledger>),
                };
                Ok(Delivery::new(channel.clone(), payload, false, acker))
            }
            Some(Err(e)) => Err(EventBusError::TransportError(format!(
                "Failed to receive message: {e}"
            ))),
            None => break,
        };

        if tx.send(item).await.is_err() {
            tracing::debug!(channel = %channel, "Subscriber dropped, stopping consumer");
            break;
        }
    }

    drop(records);
    drop(consumer);
    if let Some((bus, group)) = ephemeral_group {
        delete_group(&bus, &group).await;
    }

    tracing::debug!(channel = %channel, "Consumer task exiting");
}

/// Remove a consumer group that will never be joined again.
///
/// Fails with `NonEmptyGroup` while an unacknowledged delivery still holds the
/// consumer; the group then expires with the broker's offset retention.
async fn delete_group(bus: &RedpandaEventBus, group: &str) {
    let admin: AdminClient<DefaultClientContext> = match bus.producer_config().create() {
        Ok(admin) => admin,
        Err(e) => {
            tracing::debug!(group = %group, error = %e, "No admin client for group cleanup");
            return;
        }
    };
    let options = AdminOptions::new().operation_timeout(Some(bus.timeout));

    match admin.delete_groups(&[group], &options).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(deleted) => tracing::debug!(group = %deleted, "Ephemeral consumer group deleted"),
                    Err((name, code)) => {
                        tracing::debug!(group = %name, error = %code, "Ephemeral consumer group kept");
                    }
                }
            }
        }
        Err(e) => tracing::debug!(group = %group, error = %e, "Failed to delete ephemeral consumer group"),
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl Acknowledger for KafkaAcker {
    fn ack(self: Box<Self>) -> BusFuture<'static, ()> {
        Box::pin(async move {
            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
                .map_err(|e| EventBusError::AckFailed(e.to_string()))?;
            self.consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| EventBusError::AckFailed(e.to_string()))
        })
    }
}
