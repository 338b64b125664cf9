//! Service bus configuration.
//!
//! ```text
//! ServiceBus::configure()
//!     .with_transport_endpoints(transport)     ─┐
//!         .named("orders")                      │  one endpoint group
//!         .using_queue_for(kind)...             │  (repeatable)
//!         .connect_to_broker(uri)               │
//!         .serialized_as_json()                 │
//!         .as_client_and_server()              ─┘
//!     .using_logging()
//!     .create().await
//! ```
//!
//! Groups can also come from [`EndpointSettings`] documents.

mod builder;
mod settings;

pub use builder::{
    EndpointGroupBuilder, QueueBuilder, ServiceBusBuilder, DEFAULT_STREAM_CAPACITY,
};
pub use settings::{EndpointSettings, QueueSettings, Serialization};
