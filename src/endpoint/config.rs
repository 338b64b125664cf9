//! Immutable endpoint bindings.

use serde::{Deserialize, Serialize};

use crate::message::MessageKind;
use crate::transport::{AckMode, Address, Distribution};

/// Which side of the conversation an endpoint group plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sends commands and requests; receives events and responses.
    Client,
    /// Receives commands and requests; sends events and responses.
    Server,
    ClientAndServer,
}

impl Role {
    pub fn is_client(self) -> bool {
        matches!(self, Role::Client | Role::ClientAndServer)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Role::Server | Role::ClientAndServer)
    }

    /// True when this role sends messages of `kind`.
    pub fn sends(self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::Command | MessageKind::Request => self.is_client(),
            MessageKind::Event | MessageKind::Response => self.is_server(),
        }
    }

    /// True when this role receives messages of `kind`.
    pub fn receives(self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::Command | MessageKind::Request => self.is_server(),
            MessageKind::Event | MessageKind::Response => self.is_client(),
        }
    }
}

/// Binding of one message kind to a queue, fixed once the bus is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Name of the endpoint group (usually the owning service).
    pub service: String,
    pub kind: MessageKind,
    pub queue: String,
    /// Whether `queue` is a point-to-point queue or a fan-out topic.
    pub distribution: Distribution,
    pub ack_mode: AckMode,
    pub role: Role,
    /// When set, only these message types are sent through this endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_types: Option<Vec<String>>,
}

impl EndpointConfig {
    /// Default queue name for a kind: `"<service>.<kinds>"`.
    pub fn default_queue(service: &str, kind: MessageKind) -> String {
        format!("{}.{}", service, kind.plural())
    }

    /// Events and responses fan out to every subscribing bus; commands and
    /// requests are consumed once.
    pub fn default_distribution(kind: MessageKind) -> Distribution {
        match kind {
            MessageKind::Command | MessageKind::Request => Distribution::Queue,
            MessageKind::Event | MessageKind::Response => Distribution::Topic,
        }
    }

    pub fn address(&self) -> Address {
        Address {
            name: self.queue.clone(),
            distribution: self.distribution,
        }
    }

    pub fn sends(&self) -> bool {
        self.role.sends(self.kind)
    }

    pub fn receives(&self) -> bool {
        self.role.receives(self.kind)
    }

    /// True when a message of `message_type` may be sent through here.
    pub fn accepts(&self, message_type: &str) -> bool {
        match &self.message_types {
            Some(types) => types.iter().any(|t| t == message_type),
            None => true,
        }
    }
}
