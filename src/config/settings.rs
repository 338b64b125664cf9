//! Declarative endpoint group settings, loadable from JSON.

use serde::{Deserialize, Serialize};

use crate::endpoint::Role;
use crate::error::ConfigurationError;
use crate::message::MessageKind;
use crate::transport::{AckMode, Distribution};

/// One endpoint group as a document.
///
/// ```json
/// {
///   "service": "orders",
///   "broker_uri": "memory://local",
///   "role": "client_and_server",
///   "serialization": "json",
///   "queues": [
///     { "kind": "command", "ack_mode": "client_acknowledge" },
///     { "kind": "request", "queue": "orders.quotes" },
///     { "kind": "event", "distribution": "queue" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub service: String,
    pub broker_uri: String,
    pub role: Role,
    #[serde(default)]
    pub serialization: Serialization,
    /// Kinds left out use their default queue.
    #[serde(default)]
    pub queues: Vec<QueueSettings>,
}

/// Named payload format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Serialization {
    #[default]
    Json,
    Bitcode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Defaults by kind: topics for events and responses, queues otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_types: Option<Vec<String>>,
}

impl EndpointSettings {
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(text).map_err(|e| {
            ConfigurationError::new(vec![format!("invalid endpoint settings: {}", e)])
        })
    }

    /// Parse a JSON array of endpoint groups, as taken by
    /// `ServiceBusBuilder::with_endpoint_settings_list`.
    pub fn list_from_json(text: &str) -> Result<Vec<Self>, ConfigurationError> {
        serde_json::from_str(text).map_err(|e| {
            ConfigurationError::new(vec![format!("invalid endpoint settings: {}", e)])
        })
    }
}
