//! Typed service bus over pluggable message brokers.
//!
//! Applications exchange four kinds of messages: events (published),
//! commands (sent), requests and their correlated responses. A
//! [`ServiceBus`] binds each kind to one or more broker queues or topics,
//! encodes messages with a [`Codec`], and exposes every received kind as a
//! stream.
//!
//! See [`ServiceBus::configure`] for assembling a bus.

pub mod bus;
pub mod codec;
pub mod config;
pub mod endpoint;
mod error;
mod message;
pub mod transport;

pub use bus::{BusStats, MessageStream, ResponseStream, ServiceBus, StreamItem};
pub use codec::{Codec, JsonCodec};
#[cfg(feature = "bitcode")]
pub use codec::BitcodeCodec;
pub use config::{EndpointSettings, ServiceBusBuilder};
pub use endpoint::{EndpointConfig, Role};
pub use error::{
    BusError, BusResult, ConfigurationError, DeserializationError, RoutingError,
    SerializationError, TransportError,
};
pub use message::{Correlation, Message, MessageKind};
pub use transport::{AckMode, Address, Connection, Distribution, InMemoryBroker, Transport};
