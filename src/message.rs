//! Message model - the kinds a service bus routes and the trait an
//! application's message family implements.
//!
//! An application describes its messages as one tagged union, one variant
//! per concrete message type:
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use service_bus::{Correlation, Message, MessageKind};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct PlaceOrder { id: u32 }
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct QuoteRequest { id: u32, #[serde(default)] correlation: Correlation }
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum ShopMessage {
//!     PlaceOrder(PlaceOrder),
//!     QuoteRequest(QuoteRequest),
//! }
//!
//! impl Message for ShopMessage {
//!     fn kind(&self) -> MessageKind {
//!         match self {
//!             ShopMessage::PlaceOrder(_) => MessageKind::Command,
//!             ShopMessage::QuoteRequest(_) => MessageKind::Request,
//!         }
//!     }
//!
//!     fn message_type(&self) -> &str {
//!         match self {
//!             ShopMessage::PlaceOrder(_) => "PlaceOrder",
//!             ShopMessage::QuoteRequest(_) => "QuoteRequest",
//!         }
//!     }
//!
//!     fn correlation(&self) -> Option<&Correlation> {
//!         match self {
//!             ShopMessage::QuoteRequest(r) => Some(&r.correlation),
//!             _ => None,
//!         }
//!     }
//!
//!     fn correlation_mut(&mut self) -> Option<&mut Correlation> {
//!         match self {
//!             ShopMessage::QuoteRequest(r) => Some(&mut r.correlation),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let order = ShopMessage::PlaceOrder(PlaceOrder { id: 7 });
//! assert_eq!(order.kind(), MessageKind::Command);
//! assert!(order.request_id().is_none());
//! ```
//!
//! `kind()` returns exactly one kind, so a message cannot claim to be both
//! an event and a command.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four routing kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Fire-and-forget notification of something that happened.
    Event,
    /// Directive to do something; no reply expected.
    Command,
    /// Answered by one or more correlated `Response`s.
    Request,
    /// Answers a prior `Request`.
    Response,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Event,
        MessageKind::Command,
        MessageKind::Request,
        MessageKind::Response,
    ];

    /// Requests and responses carry correlation fields.
    pub fn is_correlated(self) -> bool {
        matches!(self, MessageKind::Request | MessageKind::Response)
    }

    /// Plural label used for default queue names (`orders.commands`).
    pub fn plural(self) -> &'static str {
        match self {
            MessageKind::Event => "events",
            MessageKind::Command => "commands",
            MessageKind::Request => "requests",
            MessageKind::Response => "responses",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            MessageKind::Event => 0,
            MessageKind::Command => 1,
            MessageKind::Request => 2,
            MessageKind::Response => 3,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Event => "event",
            MessageKind::Command => "command",
            MessageKind::Request => "request",
            MessageKind::Response => "response",
        };
        f.write_str(name)
    }
}

/// Correlation fields carried by requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    /// Unique per outstanding request; copied onto its responses.
    #[serde(default)]
    pub request_id: String,
    /// Identifies the requesting bus when several share a response queue.
    #[serde(default)]
    pub requester_id: String,
}

impl Correlation {
    pub fn new(request_id: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            requester_id: requester_id.into(),
        }
    }

    /// True once a request id has been assigned.
    pub fn is_assigned(&self) -> bool {
        !self.request_id.is_empty()
    }
}

/// A message family routed by a service bus.
pub trait Message: Clone + fmt::Debug + Send + Sync + 'static {
    /// The routing kind of this message.
    fn kind(&self) -> MessageKind;

    /// Concrete type tag, e.g. `"PlaceOrder"`. Used by endpoint type
    /// filters and `MessageStream::of_type`.
    fn message_type(&self) -> &str;

    /// Correlation fields; `None` for events and commands.
    fn correlation(&self) -> Option<&Correlation> {
        None
    }

    fn correlation_mut(&mut self) -> Option<&mut Correlation> {
        None
    }

    /// The assigned request id, if any.
    fn request_id(&self) -> Option<&str> {
        self.correlation()
            .filter(|c| c.is_assigned())
            .map(|c| c.request_id.as_str())
    }
}
