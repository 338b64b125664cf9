//! Endpoints - one message kind bound to one transport queue.
//!
//! An endpoint pairs an immutable [`EndpointConfig`] with the connection and
//! codec of its endpoint group. Which direction it carries depends on the
//! group's [`Role`]:
//!
//! | kind              | `Client`  | `Server`  | `ClientAndServer` |
//! |-------------------|-----------|-----------|-------------------|
//! | Command, Request  | sends     | receives  | both              |
//! | Event, Response   | receives  | sends     | both              |

mod config;
mod endpoint;

pub use config::{EndpointConfig, Role};
pub use endpoint::{Endpoint, Incoming, Received};

pub use crate::transport::AckMode;
