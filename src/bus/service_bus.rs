//! Service bus - typed messaging over a set of endpoints.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::correlation::CorrelationTable;
use super::stats::{BusStats, Counters};
use super::stream::{MessageStream, ResponseStream, StreamItem};
use crate::config::ServiceBusBuilder;
use crate::endpoint::{Endpoint, EndpointConfig, Incoming};
use crate::error::{BusError, BusResult, RoutingError, TransportError};
use crate::message::{Message, MessageKind};
use crate::transport::{AckHandle, Connection};

/// Typed service bus.
///
/// Cheap to clone; clones share the same endpoints, streams and
/// correlation table. Build one with [`ServiceBus::configure`].
///
/// ## Example
///
/// ```ignore
/// let bus = ServiceBus::configure()
///     .with_transport_endpoints(broker)
///         .named("orders")
///         .using_queue_for(MessageKind::Command).client_acknowledge()
///         .connect_to_broker("memory://local")
///         .serialized_as_json()
///         .as_client_and_server()
///     .create()
///     .await?;
///
/// let mut commands = bus.commands();
/// bus.send(OrderMessage::PlaceOrder(PlaceOrder { id: 1 })).await?;
/// let command = commands.next().await;
///
/// bus.dispose().await?;
/// ```
pub struct ServiceBus<M: Message> {
    inner: Arc<Inner<M>>,
}

impl<M: Message> Clone for ServiceBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<M: Message> {
    requester_id: String,
    /// Registration order; the first matching endpoint wins on send.
    endpoints: Vec<Arc<Endpoint<M>>>,
    connections: Vec<Arc<dyn Connection>>,
    /// `None` once disposed.
    channels: RwLock<Option<Channels<M>>>,
    correlations: Arc<CorrelationTable<M>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
    /// Held for the whole release; true once connections are closed.
    released: tokio::sync::Mutex<bool>,
    counters: Arc<Counters>,
    logging: bool,
}

/// One broadcast channel per message kind.
struct Channels<M> {
    senders: [broadcast::Sender<StreamItem<M>>; 4],
}

impl<M: Message> Channels<M> {
    fn new(capacity: usize) -> Self {
        Self {
            senders: [
                broadcast::channel(capacity).0,
                broadcast::channel(capacity).0,
                broadcast::channel(capacity).0,
                broadcast::channel(capacity).0,
            ],
        }
    }

    fn sender(&self, kind: MessageKind) -> &broadcast::Sender<StreamItem<M>> {
        &self.senders[kind.index()]
    }
}

/// Everything a bus needs to start, assembled by the builder.
pub(crate) struct BusParts<M: Message> {
    pub(crate) requester_id: String,
    pub(crate) endpoints: Vec<Endpoint<M>>,
    pub(crate) connections: Vec<Arc<dyn Connection>>,
    pub(crate) stream_capacity: usize,
    pub(crate) logging: bool,
}

impl<M: Message> ServiceBus<M> {
    /// Start configuring a bus.
    pub fn configure() -> ServiceBusBuilder<M> {
        ServiceBusBuilder::new()
    }

    /// Subscribe every receiving endpoint, spawn one receive pump per
    /// subscription and return the live bus.
    ///
    /// Subscriptions are in place before this returns, so nothing published
    /// to a topic afterwards is missed. If one fails, every connection is
    /// closed again. Must be called from within a tokio runtime.
    pub(crate) async fn start(parts: BusParts<M>) -> BusResult<Self> {
        let endpoints: Vec<Arc<Endpoint<M>>> = parts.endpoints.into_iter().map(Arc::new).collect();

        let mut subscriptions = Vec::new();
        for endpoint in endpoints.iter().filter(|e| e.config().receives()) {
            match endpoint.subscribe().await {
                Ok(incoming) => subscriptions.push((endpoint.config().clone(), incoming)),
                Err(error) => {
                    tracing::warn!(
                        queue = %endpoint.config().queue,
                        error = %error,
                        "subscription failed"
                    );
                    for connection in &parts.connections {
                        let _ = connection.close().await;
                    }
                    return Err(error);
                }
            }
        }

        let channels = Channels::new(parts.stream_capacity);
        let correlations = CorrelationTable::new(parts.requester_id.clone());
        let counters = Arc::new(Counters::default());
        let pumps = subscriptions
            .into_iter()
            .map(|(config, incoming)| {
                tokio::spawn(pump(
                    Receiver {
                        kind: config.kind,
                        queue: config.queue,
                        logging: parts.logging,
                    },
                    incoming,
                    channels.sender(config.kind).clone(),
                    Arc::clone(&correlations),
                    Arc::clone(&counters),
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(
            requester_id = %parts.requester_id,
            endpoints = endpoints.len(),
            receivers = pumps.len(),
            "service bus created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                requester_id: parts.requester_id,
                endpoints,
                connections: parts.connections,
                channels: RwLock::new(Some(channels)),
                correlations,
                pumps: Mutex::new(pumps),
                disposed: AtomicBool::new(false),
                released: tokio::sync::Mutex::new(false),
                counters,
                logging: parts.logging,
            }),
        })
    }

    /// Identifies this bus on the requests it sends.
    pub fn requester_id(&self) -> &str {
        &self.inner.requester_id
    }

    /// Every endpoint binding, in registration order.
    pub fn endpoints(&self) -> Vec<EndpointConfig> {
        self.inner
            .endpoints
            .iter()
            .map(|endpoint| endpoint.config().clone())
            .collect()
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Events received by every event endpoint.
    pub fn events(&self) -> MessageStream<M> {
        self.stream(MessageKind::Event)
    }

    /// Commands received by every command endpoint.
    pub fn commands(&self) -> MessageStream<M> {
        self.stream(MessageKind::Command)
    }

    /// Requests received by every request endpoint.
    pub fn requests(&self) -> MessageStream<M> {
        self.stream(MessageKind::Request)
    }

    /// Responses to requests this bus sent.
    ///
    /// Responses naming another requester are settled and dropped by the
    /// receive pump; responses naming none are kept.
    pub fn responses(&self) -> MessageStream<M> {
        self.stream(MessageKind::Response)
    }

    fn stream(&self, kind: MessageKind) -> MessageStream<M> {
        match &*self.inner.channels.read() {
            Some(channels) => MessageStream::subscribe(channels.sender(kind).subscribe()),
            None => MessageStream::closed(),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Publish an event.
    pub async fn publish(&self, event: M) -> BusResult<()> {
        self.ensure_live()?;
        expect_kind(MessageKind::Event, &event)?;
        let endpoint = self.route(&event)?;
        self.send_via(&endpoint, &event).await
    }

    /// Send a command.
    pub async fn send(&self, command: M) -> BusResult<()> {
        self.ensure_live()?;
        expect_kind(MessageKind::Command, &command)?;
        let endpoint = self.route(&command)?;
        self.send_via(&endpoint, &command).await
    }

    /// Answer `request` with `response`.
    ///
    /// The request's correlation fields are copied onto the response before
    /// it is sent, so it reaches the exact caller that asked.
    pub async fn reply(&self, request: &M, mut response: M) -> BusResult<()> {
        self.ensure_live()?;
        expect_kind(MessageKind::Request, request)?;
        expect_kind(MessageKind::Response, &response)?;

        let correlation = request
            .correlation()
            .cloned()
            .ok_or_else(|| RoutingError::MissingCorrelation(request.message_type().to_string()))?;
        let response_type = response.message_type().to_string();
        match response.correlation_mut() {
            Some(target) => *target = correlation,
            None => return Err(RoutingError::MissingCorrelation(response_type).into()),
        }

        let endpoint = self.route(&response)?;
        self.send_via(&endpoint, &response).await
    }

    /// Send `request` and return the stream of responses correlated to it.
    ///
    /// A request id and requester id are assigned when the request carries
    /// none. The correlation entry exists before the request leaves, and
    /// lives until the returned stream is dropped.
    pub async fn get_responses(&self, mut request: M) -> BusResult<ResponseStream<M>> {
        self.ensure_live()?;
        expect_kind(MessageKind::Request, &request)?;

        let request_type = request.message_type().to_string();
        let correlation = request
            .correlation_mut()
            .ok_or(RoutingError::MissingCorrelation(request_type))?;
        if !correlation.is_assigned() {
            correlation.request_id = Uuid::new_v4().to_string();
        }
        if correlation.requester_id.is_empty() {
            correlation.requester_id = self.inner.requester_id.clone();
        }
        let request_id = correlation.request_id.clone();

        let endpoint = self.route(&request)?;
        let (rx, guard) = self.inner.correlations.register(&request_id)?;
        // A failed send drops the guard, removing the entry again.
        self.send_via(&endpoint, &request).await?;
        Ok(ResponseStream::new(request_id, rx, guard))
    }

    /// Send `request` and wait for its first response.
    pub async fn get_response(&self, request: M, timeout: Duration) -> BusResult<M> {
        let mut responses = self.get_responses(request).await?;
        match tokio::time::timeout(timeout, responses.next()).await {
            Ok(Some(response)) => response,
            Ok(None) => Err(TransportError::Disposed.into()),
            Err(_) => Err(BusError::Timeout {
                request_id: responses.request_id().to_string(),
                timeout,
            }),
        }
    }

    /// Number of requests still awaiting responses.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlations.len()
    }

    pub fn stats(&self) -> BusStats {
        self.inner.counters.snapshot(self.pending_requests())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Stop every receive pump, close every connection and complete every
    /// stream. Safe to call more than once; later calls wait for the first
    /// to finish.
    pub async fn dispose(&self) -> BusResult<()> {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let mut released = self.inner.released.lock().await;
        if *released {
            return Ok(());
        }

        let pumps = std::mem::take(&mut *self.inner.pumps.lock());
        for pump in &pumps {
            pump.abort();
        }
        for pump in pumps {
            let _ = pump.await;
        }

        let mut first_error = None;
        for connection in &self.inner.connections {
            if let Err(error) = connection.close().await {
                tracing::warn!(error = %error, "closing connection failed");
                first_error.get_or_insert(error);
            }
        }

        self.inner.correlations.clear();
        self.inner.channels.write().take();
        *released = true;

        tracing::info!(requester_id = %self.inner.requester_id, "service bus disposed");
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn ensure_live(&self) -> BusResult<()> {
        if self.is_disposed() {
            Err(TransportError::Disposed.into())
        } else {
            Ok(())
        }
    }

    /// First endpoint, in registration order, that sends this message.
    fn route(&self, message: &M) -> Result<Arc<Endpoint<M>>, RoutingError> {
        let kind = message.kind();
        let message_type = message.message_type();
        self.inner
            .endpoints
            .iter()
            .find(|endpoint| {
                let config = endpoint.config();
                config.kind == kind && config.sends() && config.accepts(message_type)
            })
            .cloned()
            .ok_or_else(|| RoutingError::NoEndpoint {
                kind,
                message_type: message_type.to_string(),
            })
    }

    async fn send_via(&self, endpoint: &Endpoint<M>, message: &M) -> BusResult<()> {
        endpoint.send(message).await?;
        self.inner.counters.sent();
        if self.inner.logging {
            tracing::debug!(
                queue = %endpoint.config().queue,
                message_type = message.message_type(),
                "message sent"
            );
        }
        Ok(())
    }
}

fn expect_kind<M: Message>(expected: MessageKind, message: &M) -> Result<(), RoutingError> {
    let actual = message.kind();
    if actual == expected {
        Ok(())
    } else {
        Err(RoutingError::UnexpectedKind {
            expected,
            actual,
            message_type: message.message_type().to_string(),
        })
    }
}

/// What a receive pump knows about its endpoint.
struct Receiver {
    kind: MessageKind,
    queue: String,
    logging: bool,
}

/// Move one endpoint's deliveries onto its kind's channel.
async fn pump<M: Message>(
    receiver: Receiver,
    mut incoming: Incoming<M>,
    channel: broadcast::Sender<StreamItem<M>>,
    correlations: Arc<CorrelationTable<M>>,
    counters: Arc<Counters>,
) {
    let queue = receiver.queue.as_str();

    while let Some(item) = incoming.next().await {
        match item {
            Ok(received) => {
                let (message, ack) = received.into_parts();
                if receiver.kind == MessageKind::Response
                    && !correlations.is_addressed_here(&message)
                {
                    if receiver.logging {
                        tracing::debug!(
                            queue = %queue,
                            request_id = message.request_id().unwrap_or_default(),
                            "ignoring response for another requester"
                        );
                    }
                    settle(ack, queue, &channel, &counters);
                    continue;
                }

                counters.received();
                if receiver.logging {
                    tracing::debug!(
                        queue = %queue,
                        message_type = message.message_type(),
                        "message received"
                    );
                }
                if receiver.kind == MessageKind::Response {
                    correlations.dispatch(&message);
                }
                // No subscribers is not an error.
                let _ = channel.send(Ok(message));
                settle(ack, queue, &channel, &counters);
            }
            Err(error) => {
                counters.failed();
                tracing::warn!(queue = %queue, error = %error, "receive failed");
                if receiver.kind == MessageKind::Response && error.is_connection_error() {
                    correlations.fail_all(&error);
                }
                let _ = channel.send(Err(error));
            }
        }
    }

    tracing::debug!(queue = %queue, "receive stream ended");
}

fn settle<M: Message>(
    ack: AckHandle,
    queue: &str,
    channel: &broadcast::Sender<StreamItem<M>>,
    counters: &Counters,
) {
    let manual = ack.is_manual();
    match ack.acknowledge() {
        Ok(()) if manual => counters.acknowledged(),
        Ok(()) => {}
        Err(error) => {
            tracing::warn!(queue = %queue, error = %error, "acknowledge failed");
            let _ = channel.send(Err(error.into()));
        }
    }
}

impl<M: Message> Drop for Inner<M> {
    fn drop(&mut self) {
        for pump in self.pumps.get_mut().drain(..) {
            pump.abort();
        }
    }
}

impl<M: Message> fmt::Debug for ServiceBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBus")
            .field("requester_id", &self.inner.requester_id)
            .field("endpoints", &self.inner.endpoints)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
