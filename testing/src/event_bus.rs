//! In-memory broker simulator.
//!
//! [`InMemoryEventBus`] reproduces the routing and acknowledgment semantics
//! the services rely on, without a real broker:
//!
//! - **Broadcast channels** fan out. Every subscription is bound to its own
//!   queue; an ephemeral subscription's queue is deleted when its connection
//!   closes, a durable group's queue keeps collecting messages while nobody is
//!   attached. A broadcast published while nothing is bound is dropped.
//! - **Point-to-point channels** are named durable queues. Attached consumers
//!   compete: each message goes to exactly one of them. Publishing to a queue
//!   nobody declared drops the message.
//! - **Acknowledgment**: in after-processing mode a delivery that is dropped
//!   without [`Delivery::ack`] goes back to the front of its queue and is
//!   redelivered with the redelivered flag set. In on-delivery mode it is
//!   gone as soon as it is handed out.
//!
//! Test hooks control reachability, sever every open connection, inject
//! publish failures and inspect queues and the publish log.
//!
//! # Example
//!
//! ```
//! use conference_core::channel::Channel;
//! use conference_core::event_bus::{EventBus, SubscribeOptions};
//! use conference_testing::InMemoryEventBus;
//! use futures::StreamExt;
//!
//! # tokio_test::block_on(async {
//! let bus = InMemoryEventBus::new();
//! let queue = Channel::point_to_point("jobs");
//!
//! let connection = bus.connect().await.unwrap();
//! connection.declare(&queue).await.unwrap();
//! connection.publish(&queue, b"work").await.unwrap();
//!
//! let mut deliveries = connection.subscribe(&queue, &SubscribeOptions::default()).await.unwrap();
//! let mut delivery = deliveries.next().await.unwrap().unwrap();
//! assert_eq!(delivery.payload(), b"work");
//! delivery.ack().await.unwrap();
//! assert_eq!(bus.pending(&queue), 0);
//! # });
//! ```

#![allow(clippy::unwrap_used)] // Poisoned locks only happen after a test already panicked
#![allow(clippy::missing_panics_doc)]

use conference_core::channel::{Channel, ChannelKind};
use conference_core::event_bus::{
    AckMode, Acknowledger, BusConnection, BusFuture, Delivery, DeliveryStream, EventBus,
    EventBusError, SubscribeOptions,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: usize,
    consumers: usize,
}

#[derive(Debug, Default)]
struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn push(&self, message: Message) {
        self.state.lock().unwrap().ready.push_back(message);
        self.notify.notify_waiters();
    }

    fn requeue(&self, message: Message) {
        {
            let mut state = self.state.lock().unwrap();
            state.unacked = state.unacked.saturating_sub(1);
            state.ready.push_front(Message {
                redelivered: true,
                ..message
            });
        }
        self.notify.notify_waiters();
    }

    fn settle(&self) {
        let mut state = self.state.lock().unwrap();
        state.unacked = state.unacked.saturating_sub(1);
    }

    fn try_take(&self, track_ack: bool) -> Option<Message> {
        let mut state = self.state.lock().unwrap();
        let message = state.ready.pop_front()?;
        if track_ack {
            state.unacked += 1;
        }
        Some(message)
    }

    async fn take(&self, track_ack: bool) -> Message {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.try_take(track_ack) {
                return message;
            }
            notified.await;
        }
    }

    fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    fn unacked(&self) -> usize {
        self.state.lock().unwrap().unacked
    }

    fn consumers(&self) -> usize {
        self.state.lock().unwrap().consumers
    }

    fn attach(&self) {
        self.state.lock().unwrap().consumers += 1;
    }

    fn detach(&self) {
        let mut state = self.state.lock().unwrap();
        state.consumers = state.consumers.saturating_sub(1);
    }
}

#[derive(Debug, Default)]
struct Fanout {
    /// Ephemeral queues by subscription id, with the owning connection
    ephemeral: HashMap<u64, (u64, Arc<Queue>)>,
    /// Durable queues by group
    durable: HashMap<String, Arc<Queue>>,
}

impl Fanout {
    fn queues(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.ephemeral.values().map(|(_, queue)| queue).chain(self.durable.values())
    }
}

#[derive(Debug)]
struct BrokerState {
    reachable: bool,
    fail_publishes: bool,
    connect_attempts: usize,
    next_id: u64,
    connections: HashMap<u64, watch::Sender<bool>>,
    queues: HashMap<String, Arc<Queue>>,
    fanouts: HashMap<String, Fanout>,
    published: Vec<(Channel, Vec<u8>)>,
    dropped: usize,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn declare(&mut self, channel: &Channel) {
        match channel.kind() {
            ChannelKind::PointToPoint => {
                self.queues.entry(channel.name().to_string()).or_default();
            }
            ChannelKind::Broadcast => {
                self.fanouts.entry(channel.name().to_string()).or_default();
            }
        }
    }

    fn route(&mut self, channel: &Channel, payload: &[u8]) -> Result<(), EventBusError> {
        let message = Message {
            payload: payload.to_vec(),
            redelivered: false,
        };

        match channel.kind() {
            ChannelKind::PointToPoint => match self.queues.get(channel.name()) {
                Some(queue) => queue.push(message),
                None => self.dropped += 1,
            },
            ChannelKind::Broadcast => {
                let fanout = self.fanouts.get(channel.name()).ok_or_else(|| {
                    EventBusError::PublishFailed {
                        channel: channel.name().to_string(),
                        reason: "broadcast channel not declared".to_string(),
                    }
                })?;
                let mut bound = 0;
                for queue in fanout.queues() {
                    queue.push(message.clone());
                    bound += 1;
                }
                if bound == 0 {
                    self.dropped += 1;
                }
            }
        }

        self.published.push((channel.clone(), payload.to_vec()));
        Ok(())
    }

    fn close_connection(&mut self, id: u64) {
        if let Some(alive) = self.connections.remove(&id) {
            alive.send_replace(false);
        }
        for fanout in self.fanouts.values_mut() {
            fanout.ephemeral.retain(|_, (owner, _)| *owner != id);
        }
    }

    fn queues_for(&self, channel: &Channel) -> Vec<Arc<Queue>> {
        match channel.kind() {
            ChannelKind::PointToPoint => self.queues.get(channel.name()).cloned().into_iter().collect(),
            ChannelKind::Broadcast => self
                .fanouts
                .get(channel.name())
                .map(|fanout| fanout.queues().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

/// In-memory broker for tests.
///
/// Cloning shares the same broker state.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryEventBus {
    /// A reachable broker with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                reachable: true,
                fail_publishes: false,
                connect_attempts: 0,
                next_id: 0,
                connections: HashMap::new(),
                queues: HashMap::new(),
                fanouts: HashMap::new(),
                published: Vec::new(),
                dropped: 0,
            })),
        }
    }

    /// Make new connection attempts succeed or fail. Open connections are
    /// not affected; see [`InMemoryEventBus::disconnect_all`].
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Make every publish fail with [`EventBusError::PublishFailed`].
    pub fn set_publish_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_publishes = fail;
    }

    /// Sever every open connection, as if the broker restarted.
    ///
    /// Subscription streams yield a [`EventBusError::ConnectionClosed`] and
    /// end; ephemeral queues are deleted.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            state.close_connection(id);
        }
    }

    /// Declare a channel and publish to it, as another service would.
    ///
    /// Bypasses reachability so tests can feed messages while the services
    /// under test are cut off.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] when publish failure is
    /// injected.
    pub async fn publish_raw(&self, channel: &Channel, payload: &[u8]) -> Result<(), EventBusError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publishes {
            return Err(EventBusError::PublishFailed {
                channel: channel.name().to_string(),
                reason: "publish failure injected".to_string(),
            });
        }
        state.declare(channel);
        state.route(channel, payload)
    }

    /// Connection attempts so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_attempts
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Whether a channel has been declared.
    #[must_use]
    pub fn is_declared(&self, channel: &Channel) -> bool {
        let state = self.state.lock().unwrap();
        match channel.kind() {
            ChannelKind::PointToPoint => state.queues.contains_key(channel.name()),
            ChannelKind::Broadcast => state.fanouts.contains_key(channel.name()),
        }
    }

    /// Messages waiting to be delivered, summed over the channel's queues.
    #[must_use]
    pub fn pending(&self, channel: &Channel) -> usize {
        let queues = self.state.lock().unwrap().queues_for(channel);
        queues.iter().map(|queue| queue.ready_len()).sum()
    }

    /// Deliveries handed out and not yet acknowledged.
    #[must_use]
    pub fn unacked(&self, channel: &Channel) -> usize {
        let queues = self.state.lock().unwrap().queues_for(channel);
        queues.iter().map(|queue| queue.unacked()).sum()
    }

    /// Active subscriptions on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        let queues = self.state.lock().unwrap().queues_for(channel);
        queues.iter().map(|queue| queue.consumers()).sum()
    }

    /// Every payload accepted on `channel`, in publish order.
    #[must_use]
    pub fn published(&self, channel: &Channel) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(published_on, _)| published_on == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Messages accepted but routed nowhere.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.state.lock().unwrap().dropped
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn connect(&self) -> BusFuture<'_, Box<dyn BusConnection>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.connect_attempts += 1;
            if !state.reachable {
                return Err(EventBusError::ConnectionFailed(
                    "broker unreachable".to_string(),
                ));
            }

            let id = state.next_id();
            let (alive_tx, alive) = watch::channel(true);
            state.connections.insert(id, alive_tx);

            Ok(Box::new(InMemoryConnection {
                id,
                broker: Arc::clone(&self.state),
                alive,
            }) as Box<dyn BusConnection>)
        })
    }
}

struct InMemoryConnection {
    id: u64,
    broker: Arc<Mutex<BrokerState>>,
    alive: watch::Receiver<bool>,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), EventBusError> {
        if *self.alive.borrow() {
            Ok(())
        } else {
            Err(EventBusError::ConnectionClosed(format!("connection {} is closed", self.id)))
        }
    }

    fn bind(&self, channel: &Channel, options: &SubscribeOptions) -> Result<Arc<Queue>, EventBusError> {
        let mut state = self.broker.lock().unwrap();
        let not_declared = || EventBusError::SubscriptionFailed {
            channel: channel.name().to_string(),
            reason: "channel not declared".to_string(),
        };

        match channel.kind() {
            ChannelKind::PointToPoint => state.queues.get(channel.name()).cloned().ok_or_else(not_declared),
            ChannelKind::Broadcast => {
                let subscription = state.next_id();
                let fanout = state.fanouts.get_mut(channel.name()).ok_or_else(not_declared)?;
                let queue = match &options.group {
                    Some(group) => Arc::clone(fanout.durable.entry(group.clone()).or_default()),
                    None => {
                        let queue = Arc::new(Queue::default());
                        fanout.ephemeral.insert(subscription, (self.id, Arc::clone(&queue)));
                        queue
                    }
                };
                Ok(queue)
            }
        }
    }
}

impl BusConnection for InMemoryConnection {
    fn declare(&self, channel: &Channel) -> BusFuture<'_, ()> {
        let channel = channel.clone();
        Box::pin(async move {
            self.ensure_open()?;
            self.broker.lock().unwrap().declare(&channel);
            Ok(())
        })
    }

    fn publish(&self, channel: &Channel, payload: &[u8]) -> BusFuture<'_, ()> {
        let channel = channel.clone();
        let payload = payload.to_vec();
        Box::pin(async move {
            self.ensure_open()?;
            let mut state = self.broker.lock().unwrap();
            if state.fail_publishes {
                return Err(EventBusError::PublishFailed {
                    channel: channel.name().to_string(),
                    reason: "publish failure injected".to_string(),
                });
            }
            state.route(&channel, &payload)
        })
    }

    fn subscribe(&self, channel: &Channel, options: &SubscribeOptions) -> BusFuture<'_, DeliveryStream> {
        let channel = channel.clone();
        let options = options.clone();
        Box::pin(async move {
            self.ensure_open()?;
            let queue = self.bind(&channel, &options)?;
            let mut alive = self.alive.clone();
            let track_ack = options.ack_mode == AckMode::AfterProcessing;
            let guard = Attachment::new(Arc::clone(&queue));

            let stream = async_stream::stream! {
                let _guard = guard;
                loop {
                    let next = tokio::select! {
                        biased;
                        () = closed(&mut alive) => None,
                        message = queue.take(track_ack) => Some(message),
                    };

                    let Some(message) = next else {
                        yield Err(EventBusError::ConnectionClosed(
                            "connection closed by broker".to_string(),
                        ));
                        break;
                    };

                    let redelivered = message.redelivered;
                    let acker = track_ack.then(|| {
                        Box::new(InMemoryAcker {
                            queue: Arc::clone(&queue),
                            message: Some(message.clone()),
                        }) as Box<dyn Acknowledger>
                    });
                    yield Ok(Delivery::new(channel.clone(), message.payload, redelivered, acker));
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            self.broker.lock().unwrap().close_connection(self.id);
            Ok(())
        })
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.broker.lock() {
            state.close_connection(self.id);
        }
    }
}

/// Resolves once the connection is no longer alive.
async fn closed(alive: &mut watch::Receiver<bool>) {
    while *alive.borrow_and_update() {
        if alive.changed().await.is_err() {
            return;
        }
    }
}

/// Counts a subscription as attached to its queue for as long as the
/// delivery stream exists.
struct Attachment {
    queue: Arc<Queue>,
}

impl Attachment {
    fn new(queue: Arc<Queue>) -> Self {
        queue.attach();
        Self { queue }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.queue.detach();
    }
}

struct InMemoryAcker {
    queue: Arc<Queue>,
    message: Option<Message>,
}

impl Acknowledger for InMemoryAcker {
    fn ack(mut self: Box<Self>) -> BusFuture<'static, ()> {
        if self.message.take().is_some() {
            self.queue.settle();
        }
        Box::pin(async { Ok(()) })
    }
}

impl Drop for InMemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.queue.requeue(message);
        }
    }
}
