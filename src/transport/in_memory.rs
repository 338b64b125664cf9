//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides an in-process transport implementing
//! `Transport` and `Connection`, useful for:
//! - Unit and integration testing without an external broker
//! - Single-process applications
//! - Development and prototyping

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    AckHandle, AckMode, Acknowledge, Address, Connection, Deliveries, Delivery, Distribution,
    Transport,
};
use crate::error::TransportError;

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, TransportError>>;

/// In-memory broker for testing and single-process scenarios.
///
/// Features:
/// - Cheap to clone; clones share the same queues and topics
/// - Queues are point-to-point: each payload goes to exactly one consumer,
///   round-robin across the live consumers of a queue
/// - Payloads sent while a queue has no consumer wait in its backlog
/// - Topics fan out: every live subscription gets its own copy, and a
///   payload published with no subscriber is dropped
/// - Client-acknowledged deliveries dropped without settlement are
///   redelivered; rejected deliveries are dead-lettered
/// - Connection loss can be simulated for failure tests
///
/// ## Example
///
/// ```
/// use futures::StreamExt;
/// use service_bus::transport::{AckMode, Address, InMemoryBroker, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = InMemoryBroker::new();
/// let connection = broker.connect("memory://local").await.unwrap();
/// let commands = Address::queue("orders.commands");
///
/// connection
///     .send(&commands, b"{}".to_vec(), AckMode::AutoAcknowledge)
///     .await
///     .unwrap();
/// assert_eq!(broker.queue_len("orders.commands"), 1);
///
/// let mut deliveries = connection
///     .subscribe(&commands, AckMode::AutoAcknowledge)
///     .await
///     .unwrap();
/// let delivery = deliveries.next().await.unwrap().unwrap();
/// assert_eq!(delivery.payload, b"{}".to_vec());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

/// A payload refused by its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Queue or topic the payload was delivered from.
    pub queue: String,
    pub payload: Vec<u8>,
    pub reason: String,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    topics: HashMap<String, TopicState>,
    /// Set while the broker is unreachable.
    outage: Option<String>,
    /// Bumped on every outage; connections from older epochs are dead.
    epoch: u64,
    next_id: u64,
    open: HashSet<u64>,
    dead_letters: Vec<DeadLetter>,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn consumers_mut(&mut self, address: &Address) -> &mut Vec<Consumer> {
        match address.distribution {
            Distribution::Queue => {
                &mut self.queues.entry(address.name.clone()).or_default().consumers
            }
            Distribution::Topic => {
                &mut self.topics.entry(address.name.clone()).or_default().subscribers
            }
        }
    }
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Pending>,
    consumers: Vec<Consumer>,
    cursor: usize,
    acknowledged: u64,
}

impl QueueState {
    fn prune(&mut self) {
        self.consumers.retain(|c| !c.tx.is_closed());
    }

    fn next_consumer(&mut self) -> Option<Target> {
        self.prune();
        if self.consumers.is_empty() {
            return None;
        }
        let consumer = &self.consumers[self.cursor % self.consumers.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Some(consumer.target())
    }
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<Consumer>,
    acknowledged: u64,
}

impl TopicState {
    fn live_subscribers(&mut self) -> Vec<Target> {
        self.subscribers.retain(|c| !c.tx.is_closed());
        self.subscribers.iter().map(Consumer::target).collect()
    }
}

struct Pending {
    payload: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    id: u64,
    connection: u64,
    ack_mode: AckMode,
    tx: DeliverySender,
}

impl Consumer {
    fn target(&self) -> Target {
        Target {
            id: self.id,
            ack_mode: self.ack_mode,
            tx: self.tx.clone(),
        }
    }
}

struct Target {
    id: u64,
    ack_mode: AckMode,
    tx: DeliverySender,
}

/// Where an unsettled delivery returns to.
#[derive(Clone)]
enum Route {
    Queue(String),
    /// One subscriber's copy of a topic payload.
    Subscription { topic: String, consumer: u64 },
}

impl Route {
    fn name(&self) -> &str {
        match self {
            Route::Queue(queue) => queue,
            Route::Subscription { topic, .. } => topic,
        }
    }
}

impl InMemoryBroker {
    /// Create a new, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads waiting for a consumer on `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    /// Number of live consumers on `queue`.
    pub fn consumer_count(&self, queue: &str) -> usize {
        let mut state = self.state.lock();
        match state.queues.get_mut(queue) {
            Some(q) => {
                q.prune();
                q.consumers.len()
            }
            None => 0,
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut state = self.state.lock();
        match state.topics.get_mut(topic) {
            Some(t) => t.live_subscribers().len(),
            None => 0,
        }
    }

    /// Number of client-acknowledged deliveries settled on a queue or topic.
    pub fn acknowledged(&self, name: &str) -> u64 {
        let state = self.state.lock();
        let queued = state.queues.get(name).map(|q| q.acknowledged).unwrap_or(0);
        let published = state.topics.get(name).map(|t| t.acknowledged).unwrap_or(0);
        queued + published
    }

    /// Every rejected payload, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead_letters.clone()
    }

    /// Number of connections that have not been closed.
    pub fn open_connections(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Drop every connection as if the broker became unreachable.
    ///
    /// Each subscription yields `TransportError::ConnectionLost` and ends.
    /// Sends on existing connections fail, and new connections are refused
    /// until [`restore`](Self::restore) is called.
    pub fn simulate_connection_loss(&self, reason: &str) {
        let mut state = self.state.lock();
        state.outage = Some(reason.to_string());
        state.epoch += 1;
        state.open.clear();
        let BrokerState { queues, topics, .. } = &mut *state;
        let consumers = queues
            .values_mut()
            .flat_map(|q| q.consumers.drain(..))
            .chain(topics.values_mut().flat_map(|t| t.subscribers.drain(..)));
        for consumer in consumers {
            let _ = consumer
                .tx
                .send(Err(TransportError::ConnectionLost(reason.to_string())));
        }
    }

    /// Make the broker reachable again. Connections lost earlier stay dead.
    pub fn restore(&self) {
        self.state.lock().outage = None;
    }

    fn check_live(&self, epoch: u64) -> Result<(), TransportError> {
        let state = self.state.lock();
        if let Some(reason) = &state.outage {
            return Err(TransportError::ConnectionLost(reason.clone()));
        }
        if state.epoch != epoch {
            return Err(TransportError::ConnectionLost(
                "connection dropped by broker".to_string(),
            ));
        }
        Ok(())
    }

    /// Wrap `pending` in a delivery and hand it to `target`.
    ///
    /// Gives the payload back when the target's subscription is gone.
    fn deliver(&self, target: &Target, route: Route, pending: Pending) -> Result<(), Pending> {
        // Built outside the lock: dropping an unsettled ack re-enters the broker.
        let settled = Arc::new(AtomicBool::new(false));
        let ack = match target.ack_mode {
            AckMode::AutoAcknowledge => AckHandle::auto(),
            AckMode::ClientAcknowledge => AckHandle::manual(Box::new(InMemoryAck {
                broker: Arc::downgrade(&self.state),
                route,
                payload: pending.payload.clone(),
                settled: Arc::clone(&settled),
            })),
        };
        let delivery = Delivery {
            payload: pending.payload,
            redelivered: pending.redelivered,
            ack,
        };

        match target.tx.send(Ok(delivery)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(returned)) => {
                settled.store(true, Ordering::SeqCst);
                match returned {
                    Ok(delivery) => Err(Pending {
                        payload: delivery.payload,
                        redelivered: delivery.redelivered,
                    }),
                    Err(_) => Ok(()),
                }
            }
        }
    }

    /// Hand a payload to the next live consumer, or park it in the backlog.
    fn dispatch(&self, queue: &str, mut pending: Pending) {
        loop {
            let target = {
                let mut state = self.state.lock();
                let offline = state.outage.is_some();
                let q = state.queues.entry(queue.to_string()).or_default();
                match (offline, q.next_consumer()) {
                    (false, Some(target)) => target,
                    _ => {
                        q.backlog.push_back(pending);
                        return;
                    }
                }
            };

            match self.deliver(&target, Route::Queue(queue.to_string()), pending) {
                Ok(()) => return,
                Err(returned) => {
                    self.remove_consumer(&Address::queue(queue), target.id);
                    pending = returned;
                }
            }
        }
    }

    /// Copy a payload to every live subscriber of `topic`.
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let targets = {
            let mut state = self.state.lock();
            if state.outage.is_some() {
                return;
            }
            state.topics.entry(topic.to_string()).or_default().live_subscribers()
        };
        for target in targets {
            let route = Route::Subscription {
                topic: topic.to_string(),
                consumer: target.id,
            };
            let pending = Pending {
                payload: payload.clone(),
                redelivered: false,
            };
            if self.deliver(&target, route, pending).is_err() {
                self.remove_consumer(&Address::topic(topic), target.id);
            }
        }
    }

    /// Give an unsettled topic copy back to the subscriber it was meant for.
    fn redeliver(&self, topic: &str, consumer: u64, pending: Pending) {
        let target = {
            let mut state = self.state.lock();
            if state.outage.is_some() {
                return;
            }
            state
                .topics
                .get_mut(topic)
                .and_then(|t| t.subscribers.iter().find(|c| c.id == consumer))
                .map(Consumer::target)
        };
        let Some(target) = target else {
            return;
        };
        let route = Route::Subscription {
            topic: topic.to_string(),
            consumer,
        };
        if self.deliver(&target, route, pending).is_err() {
            self.remove_consumer(&Address::topic(topic), consumer);
        }
    }

    /// Push backlog payloads to consumers until the backlog or the
    /// consumers run out.
    fn drain(&self, queue: &str) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.outage.is_some() {
                    return;
                }
                let Some(q) = state.queues.get_mut(queue) else {
                    return;
                };
                q.prune();
                if q.consumers.is_empty() {
                    return;
                }
                q.backlog.pop_front()
            };
            match next {
                Some(pending) => self.dispatch(queue, pending),
                None => return,
            }
        }
    }

    fn remove_consumer(&self, address: &Address, consumer: u64) {
        self.state
            .lock()
            .consumers_mut(address)
            .retain(|c| c.id != consumer);
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn Connection>, TransportError> {
        if uri.trim().is_empty() {
            return Err(TransportError::ConnectionFailed {
                uri: uri.to_string(),
                reason: "empty broker uri".to_string(),
            });
        }
        let mut state = self.state.lock();
        if let Some(reason) = &state.outage {
            return Err(TransportError::ConnectionFailed {
                uri: uri.to_string(),
                reason: reason.clone(),
            });
        }
        let id = state.next_id();
        state.open.insert(id);
        Ok(Arc::new(InMemoryConnection {
            id,
            epoch: state.epoch,
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A connection handed out by [`InMemoryBroker`].
struct InMemoryConnection {
    id: u64,
    epoch: u64,
    broker: InMemoryBroker,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.broker.check_live(self.epoch)
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn send(
        &self,
        address: &Address,
        payload: Vec<u8>,
        _ack_mode: AckMode,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        match address.distribution {
            Distribution::Queue => self.broker.dispatch(
                &address.name,
                Pending {
                    payload,
                    redelivered: false,
                },
            ),
            Distribution::Topic => self.broker.publish(&address.name, payload),
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        address: &Address,
        ack_mode: AckMode,
    ) -> Result<Deliveries, TransportError> {
        self.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.broker.state.lock();
            let id = state.next_id();
            state.consumers_mut(address).push(Consumer {
                id,
                connection: self.id,
                ack_mode,
                tx,
            });
        }
        if address.distribution == Distribution::Queue {
            self.broker.drain(&address.name);
        }
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.broker.state.lock();
        state.open.remove(&self.id);
        for queue in state.queues.values_mut() {
            queue.consumers.retain(|c| c.connection != self.id);
        }
        for topic in state.topics.values_mut() {
            topic.subscribers.retain(|c| c.connection != self.id);
        }
        Ok(())
    }
}

/// Settlement for one client-acknowledged in-memory delivery.
struct InMemoryAck {
    broker: Weak<Mutex<BrokerState>>,
    route: Route,
    payload: Vec<u8>,
    settled: Arc<AtomicBool>,
}

impl Acknowledge for InMemoryAck {
    fn acknowledge(self: Box<Self>) -> Result<(), TransportError> {
        self.settled.store(true, Ordering::SeqCst);
        let state = self.broker.upgrade().ok_or(TransportError::Closed)?;
        let mut state = state.lock();
        match &self.route {
            Route::Queue(queue) => {
                state.queues.entry(queue.clone()).or_default().acknowledged += 1
            }
            Route::Subscription { topic, .. } => {
                state.topics.entry(topic.clone()).or_default().acknowledged += 1
            }
        }
        Ok(())
    }

    fn reject(self: Box<Self>, reason: &str) -> Result<(), TransportError> {
        self.settled.store(true, Ordering::SeqCst);
        let state = self.broker.upgrade().ok_or(TransportError::Closed)?;
        state.lock().dead_letters.push(DeadLetter {
            queue: self.route.name().to_string(),
            payload: self.payload.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

impl Drop for InMemoryAck {
    fn drop(&mut self) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(state) = self.broker.upgrade() else {
            return;
        };
        let broker = InMemoryBroker { state };
        let pending = Pending {
            payload: std::mem::take(&mut self.payload),
            redelivered: true,
        };
        match &self.route {
            Route::Queue(queue) => broker.dispatch(queue, pending),
            Route::Subscription { topic, consumer } => broker.redeliver(topic, *consumer, pending),
        }
    }
}
