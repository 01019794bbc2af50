//! Archive body stream that reports delivery back to the worker.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use actors::DeliveryTicket;
use axum::body::Bytes;
use futures_util::Stream;

/// Wraps the archive byte stream and settles the delivery ticket.
///
/// The ticket completes once `len` bytes went out or the inner stream ends,
/// aborts on a read error, and aborts on drop if neither happened.
pub struct TicketedStream<S> {
    inner: S,
    remaining: u64,
    ticket: Option<DeliveryTicket>,
}

impl<S> TicketedStream<S> {
    pub fn new(inner: S, len: u64, ticket: DeliveryTicket) -> Self {
        Self {
            inner,
            remaining: len,
            ticket: Some(ticket),
        }
    }

    fn settle(&mut self, completed: bool) {
        if let Some(ticket) = self.ticket.take() {
            if completed {
                ticket.complete();
            } else {
                ticket.abort();
            }
        }
    }
}

impl<S> Stream for TicketedStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                self.remaining = self.remaining.saturating_sub(chunk.len() as u64);
                if self.remaining == 0 {
                    self.settle(true);
                }
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!("Archive read failed mid-stream: {}", e);
                self.settle(false);
            }
            Poll::Ready(None) => self.settle(true),
            Poll::Pending => {}
        }
        polled
    }
}
