//! Error taxonomy for the service bus.
//!
//! Every error is `Clone` so it can travel as an element of a broadcast
//! stream alongside the messages it concerns.

use std::time::Duration;

use thiserror::Error;

use crate::message::MessageKind;

/// Invalid or incomplete endpoint configuration, reported by `create()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid service bus configuration: {}", .problems.join("; "))]
pub struct ConfigurationError {
    /// Every problem found, in the order the builder saw them.
    pub problems: Vec<String>,
}

impl ConfigurationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }
}

/// Connection or delivery failure inside the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not establish a connection to the broker.
    #[error("connection to {uri} failed: {reason}")]
    ConnectionFailed { uri: String, reason: String },
    /// An established connection went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The broker refused or failed to take the payload.
    #[error("send to queue {queue} failed: {reason}")]
    SendFailed { queue: String, reason: String },
    /// The connection was closed by its owner.
    #[error("connection closed")]
    Closed,
    /// The service bus has been disposed.
    #[error("service bus disposed")]
    Disposed,
}

impl TransportError {
    /// True for failures of the connection itself rather than of one message.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed { .. }
                | TransportError::ConnectionLost(_)
                | TransportError::Closed
        )
    }
}

/// A payload that could not be turned back into a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeserializationError {
    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: MessageKind, reason: String },
    #[error("expected a {expected} but decoded a {actual}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
    },
}

/// An outgoing message the codec could not encode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to serialize {message_type}: {reason}")]
pub struct SerializationError {
    pub message_type: String,
    pub reason: String,
}

/// A message that cannot be routed by this bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No endpoint that sends this kind accepts the message type.
    #[error("no endpoint configured to send {kind} {message_type}")]
    NoEndpoint {
        kind: MessageKind,
        message_type: String,
    },
    /// The operation was called with a message of the wrong kind.
    #[error("expected a {expected}, got {message_type} which is a {actual}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
        message_type: String,
    },
    /// A request or response that exposes no correlation fields.
    #[error("{0} carries no correlation fields")]
    MissingCorrelation(String),
    /// Another request with this id is still awaiting responses.
    #[error("request id {0} is already awaiting responses")]
    DuplicateRequestId(String),
    /// The endpoint role does not send this kind.
    #[error("endpoint {queue} does not send {kind} messages")]
    NotSending { queue: String, kind: MessageKind },
    /// The endpoint role does not receive this kind.
    #[error("endpoint {queue} does not receive {kind} messages")]
    NotReceiving { queue: String, kind: MessageKind },
}

/// Any failure surfaced by the service bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// The subscriber fell behind the stream buffer and missed messages.
    #[error("subscriber lagged, {skipped} messages skipped")]
    Lagged { skipped: u64 },
    /// No response arrived for a request in time.
    #[error("no response to request {request_id} within {timeout:?}")]
    Timeout {
        request_id: String,
        timeout: Duration,
    },
}

impl BusError {
    /// True when the underlying transport connection failed.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BusError::Transport(e) if e.is_connection_error())
    }
}

pub type BusResult<T> = Result<T, BusError>;
