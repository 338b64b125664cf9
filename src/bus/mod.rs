//! Service Bus - typed events, commands, requests and responses over
//! transport endpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ServiceBus<M> (per service)                 │
//! │  publish() / send() / reply() / get_responses()             │
//! │  events() / commands() / requests() / responses()           │
//! └─────────────────────────────────────────────────────────────┘
//!          │ route: first sending endpoint      ▲ broadcast per kind
//!          ▼                                    │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Endpoints (kind + queue/topic + ack mode + role)           │
//! │  one receive pump task per receiving endpoint               │
//! │  response pump → own requester id? → CorrelationTable       │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Transport Connection + Codec                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request / response
//!
//! ```ignore
//! // Server side: answer every quote request.
//! let mut requests = bus.requests().of_type("QuoteRequest");
//! let server = bus.clone();
//! tokio::spawn(async move {
//!     while let Some(Ok(request)) = requests.next().await {
//!         server.reply(&request, quote_for(&request)).await?;
//!     }
//! });
//!
//! // Client side: the stream only ever yields answers to this request.
//! let answer = bus.get_response(quote_request(), Duration::from_secs(5)).await?;
//! ```

mod correlation;
mod service_bus;
mod stats;
mod stream;

pub(crate) use service_bus::BusParts;

pub use service_bus::ServiceBus;
pub use stats::BusStats;
pub use stream::{MessageStream, ResponseStream, StreamItem};
