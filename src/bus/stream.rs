//! Streams handed out by the bus.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::correlation::{CorrelationGuard, SlotReceiver};
use crate::error::BusError;
use crate::message::Message;

/// Element of every bus stream.
pub type StreamItem<M> = Result<M, BusError>;

/// One subscription to a merged per-kind stream.
///
/// Yields messages in arrival order, and errors (undecodable payloads,
/// transport failures, lag) as `Err` elements without ending. Completes
/// when the bus is disposed. Dropping it unsubscribes.
pub struct MessageStream<M> {
    inner: BoxStream<'static, StreamItem<M>>,
}

impl<M: Message> MessageStream<M> {
    pub(crate) fn subscribe(rx: broadcast::Receiver<StreamItem<M>>) -> Self {
        let inner = BroadcastStream::new(rx)
            .map(|item| match item {
                Ok(item) => item,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(BusError::Lagged { skipped }),
            })
            .boxed();
        Self { inner }
    }

    /// A stream that is already complete.
    pub(crate) fn closed() -> Self {
        Self {
            inner: stream::empty().boxed(),
        }
    }

    /// Keep only messages whose `message_type()` is `message_type`.
    /// Errors are still passed through.
    pub fn of_type(self, message_type: impl Into<String>) -> Self {
        let wanted = message_type.into();
        let inner = self
            .inner
            .filter(move |item| {
                future::ready(match item {
                    Ok(message) => message.message_type() == wanted,
                    Err(_) => true,
                })
            })
            .boxed();
        Self { inner }
    }

    /// Drop error elements, yielding only messages.
    pub fn messages(self) -> BoxStream<'static, M> {
        self.inner
            .filter_map(|item| future::ready(item.ok()))
            .boxed()
    }
}

impl<M> Stream for MessageStream<M> {
    type Item = StreamItem<M>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Responses correlated to one request.
///
/// The bus never completes it while running; take what you need and drop
/// it, which removes the correlation entry.
pub struct ResponseStream<M> {
    request_id: String,
    rx: SlotReceiver<M>,
    _guard: CorrelationGuard<M>,
}

impl<M> ResponseStream<M> {
    pub(crate) fn new(request_id: String, rx: SlotReceiver<M>, guard: CorrelationGuard<M>) -> Self {
        Self {
            request_id,
            rx,
            _guard: guard,
        }
    }

    /// The request id responses are matched against.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl<M> fmt::Debug for ResponseStream<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl<M> Stream for ResponseStream<M> {
    type Item = StreamItem<M>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
