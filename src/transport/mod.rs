//! Transport adapter - the narrow interface the bus needs from a broker.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Endpoint (per kind, per queue)              │
//! │  - encodes / decodes with its Codec                         │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Transport + Connection traits                │
//! │  Transport: connect(uri)                                    │
//! │  Connection: send(addr) / subscribe(addr) / close()         │
//! │  Address: queue (one consumer) or topic (every subscriber)  │
//! │  Delivery: payload + AckHandle (acknowledge / reject)       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌───────────────┐   ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryBroker │   │  ActiveMQ   │    │      RabbitMQ       │
//! │  (included)   │   │ (external)  │    │     (external)      │
//! └───────────────┘   └─────────────┘    └─────────────────────┘
//! ```

mod in_memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use in_memory::{DeadLetter, InMemoryBroker};

/// How a destination hands payloads to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Point-to-point: each payload reaches exactly one consumer.
    Queue,
    /// Publish/subscribe: every live subscription receives its own copy.
    /// Payloads published while nobody subscribes are dropped.
    Topic,
}

/// A named broker destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub name: String,
    pub distribution: Distribution,
}

impl Address {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            distribution: Distribution::Queue,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            distribution: Distribution::Topic,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.distribution {
            Distribution::Queue => write!(f, "queue://{}", self.name),
            Distribution::Topic => write!(f, "topic://{}", self.name),
        }
    }
}

/// When the transport considers a delivered message consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Delivery completes as soon as the message is handed over.
    #[default]
    AutoAcknowledge,
    /// Delivery completes only on an explicit acknowledgement; an
    /// unacknowledged message goes back to the queue.
    ///
    /// A `ServiceBus` settles the delivery once the decoded message has been
    /// broadcast to its subscribers, not after they have handled it. Code
    /// that must settle after handling consumes `Endpoint::receive` directly
    /// and calls `Received::acknowledge` itself.
    ClientAcknowledge,
}

/// Stream of deliveries for one subscription.
pub type Deliveries = BoxStream<'static, Result<Delivery, TransportError>>;

/// Factory for broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the broker at `uri`.
    async fn connect(&self, uri: &str) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Hand a payload to a queue or topic.
    async fn send(
        &self,
        address: &Address,
        payload: Vec<u8>,
        ack_mode: AckMode,
    ) -> Result<(), TransportError>;

    /// Start consuming a queue or topic.
    ///
    /// The stream yields `Err(TransportError::ConnectionLost(..))` before
    /// ending if the connection drops.
    async fn subscribe(
        &self,
        address: &Address,
        ack_mode: AckMode,
    ) -> Result<Deliveries, TransportError>;

    /// Close the connection, ending every subscription it owns.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Settles one client-acknowledged delivery.
///
/// Implementations should return the message to its destination when
/// dropped without being settled.
pub trait Acknowledge: Send {
    fn acknowledge(self: Box<Self>) -> Result<(), TransportError>;

    fn reject(self: Box<Self>, reason: &str) -> Result<(), TransportError>;
}

/// Acknowledgement handle attached to a delivery.
///
/// Auto-acknowledged deliveries carry an empty handle whose calls are no-ops.
pub struct AckHandle {
    inner: Option<Box<dyn Acknowledge>>,
}

impl AckHandle {
    /// Handle for a delivery the transport already completed.
    pub fn auto() -> Self {
        Self { inner: None }
    }

    /// Handle that must be settled explicitly.
    pub fn manual(ack: Box<dyn Acknowledge>) -> Self {
        Self { inner: Some(ack) }
    }

    /// True when the delivery still awaits an explicit settlement.
    pub fn is_manual(&self) -> bool {
        self.inner.is_some()
    }

    /// Mark the delivery as processed.
    pub fn acknowledge(mut self) -> Result<(), TransportError> {
        match self.inner.take() {
            Some(ack) => ack.acknowledge(),
            None => Ok(()),
        }
    }

    /// Refuse the delivery; the broker discards or dead-letters it.
    pub fn reject(mut self, reason: &str) -> Result<(), TransportError> {
        match self.inner.take() {
            Some(ack) => ack.reject(reason),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("manual", &self.is_manual())
            .finish()
    }
}

/// A raw payload received from a queue or topic.
#[derive(Debug)]
pub struct Delivery {
    pub payload: Vec<u8>,
    /// True when this payload was delivered before and not acknowledged.
    pub redelivered: bool,
    pub ack: AckHandle,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, ack: AckHandle) -> Self {
        Self {
            payload,
            redelivered: false,
            ack,
        }
    }
}
