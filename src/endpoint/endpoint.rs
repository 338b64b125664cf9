//! Endpoint - typed send and receive over one queue or topic.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;

use super::config::EndpointConfig;
use crate::codec::Codec;
use crate::error::{BusError, RoutingError, TransportError};
use crate::message::{Message, MessageKind};
use crate::transport::{AckHandle, Connection, Deliveries, Delivery};

/// Infinite stream of decoded deliveries from one endpoint.
pub type Incoming<M> = BoxStream<'static, Result<Received<M>, BusError>>;

/// A decoded message together with its delivery settlement.
#[derive(Debug)]
pub struct Received<M> {
    pub message: M,
    /// True when the transport delivered this message before.
    pub redelivered: bool,
    ack: AckHandle,
}

impl<M> Received<M> {
    /// Complete the delivery (a no-op for auto-acknowledged endpoints) and
    /// hand back the message.
    pub fn acknowledge(self) -> Result<M, TransportError> {
        self.ack.acknowledge()?;
        Ok(self.message)
    }

    /// Separate the message from its acknowledgement handle.
    pub fn into_parts(self) -> (M, AckHandle) {
        (self.message, self.ack)
    }
}

/// One message kind bound to a destination, a codec and a connection.
pub struct Endpoint<M: Message> {
    config: EndpointConfig,
    connection: Arc<dyn Connection>,
    codec: Arc<dyn Codec<M>>,
}

impl<M: Message> Endpoint<M> {
    pub fn new(
        config: EndpointConfig,
        connection: Arc<dyn Connection>,
        codec: Arc<dyn Codec<M>>,
    ) -> Self {
        Self {
            config,
            connection,
            codec,
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn kind(&self) -> MessageKind {
        self.config.kind
    }

    /// Serialize `message` and hand it to this endpoint's destination.
    ///
    /// Returns once the transport has taken the payload. Transport failures
    /// are returned as-is; retrying is up to the caller.
    pub async fn send(&self, message: &M) -> Result<(), BusError> {
        if !self.config.sends() {
            return Err(RoutingError::NotSending {
                queue: self.config.queue.clone(),
                kind: self.config.kind,
            }
            .into());
        }
        let payload = self.codec.serialize(message)?;
        self.connection
            .send(&self.config.address(), payload, self.config.ack_mode)
            .await?;
        Ok(())
    }

    /// Subscribe now and return the decoded deliveries.
    ///
    /// Topic payloads published after this returns reach the stream. A
    /// payload that fails to decode is rejected at the transport and yielded
    /// as `BusError::Deserialization`; the stream carries on with the next one.
    pub async fn subscribe(&self) -> Result<Incoming<M>, BusError> {
        self.check_receives()?;
        let deliveries = self
            .connection
            .subscribe(&self.config.address(), self.config.ack_mode)
            .await?;
        Ok(decoded(
            Arc::clone(&self.codec),
            self.config.kind,
            self.config.queue.clone(),
            deliveries,
        ))
    }

    /// Like [`subscribe`](Self::subscribe), but the subscription starts on
    /// first poll and its failure is the stream's first item.
    pub fn receive(&self) -> Incoming<M> {
        if let Err(refused) = self.check_receives() {
            return stream::iter([Err(refused)]).boxed();
        }

        let connection = Arc::clone(&self.connection);
        let codec = Arc::clone(&self.codec);
        let address = self.config.address();
        let ack_mode = self.config.ack_mode;
        let kind = self.config.kind;

        let subscription = stream::once(async move {
            let subscribed = connection.subscribe(&address, ack_mode).await;
            (address, subscribed)
        });

        subscription
            .flat_map(move |(address, subscribed)| match subscribed {
                Ok(deliveries) => decoded(Arc::clone(&codec), kind, address.name, deliveries),
                Err(error) => {
                    tracing::warn!(address = %address, error = %error, "subscription failed");
                    stream::iter([Err(BusError::from(error))]).boxed()
                }
            })
            .boxed()
    }

    fn check_receives(&self) -> Result<(), BusError> {
        if self.config.receives() {
            return Ok(());
        }
        Err(RoutingError::NotReceiving {
            queue: self.config.queue.clone(),
            kind: self.config.kind,
        }
        .into())
    }
}

fn decoded<M: Message>(
    codec: Arc<dyn Codec<M>>,
    kind: MessageKind,
    queue: String,
    deliveries: Deliveries,
) -> Incoming<M> {
    deliveries
        .map(move |delivery| decode(codec.as_ref(), kind, &queue, delivery))
        .boxed()
}

fn decode<M: Message>(
    codec: &dyn Codec<M>,
    kind: MessageKind,
    queue: &str,
    delivery: Result<Delivery, TransportError>,
) -> Result<Received<M>, BusError> {
    let delivery = delivery?;
    match codec.deserialize(&delivery.payload, kind) {
        Ok(message) => Ok(Received {
            message,
            redelivered: delivery.redelivered,
            ack: delivery.ack,
        }),
        Err(error) => {
            tracing::warn!(queue = %queue, error = %error, "dropping undecodable payload");
            if let Err(reject_error) = delivery.ack.reject(&error.to_string()) {
                tracing::warn!(queue = %queue, error = %reject_error, "reject failed");
            }
            Err(error.into())
        }
    }
}

impl<M: Message> fmt::Debug for Endpoint<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .field("content_type", &self.codec.content_type())
            .finish()
    }
}
