//! The library's result primitive: a lazy, cancellable reply sequence
//!
//! A [`Replies`] is cold until polled and yields at most one `rpc-reply`
//! envelope followed, for streaming requests, by any number of
//! notifications. It ends after an error, after cancellation, or when the
//! session resolves the request. Dropping it detaches the request from the
//! session's routing table.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::session::{Envelope, Router};

/// The reply sequence of one outstanding request.
pub struct Replies {
    rx: mpsc::UnboundedReceiver<Result<Envelope, Error>>,
    router: Arc<Mutex<Router>>,
    message_id: u64,
    finished: bool,
}

impl Replies {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Result<Envelope, Error>>,
        router: Arc<Mutex<Router>>,
        message_id: u64,
    ) -> Replies {
        Replies {
            rx,
            router,
            message_id,
            finished: false,
        }
    }

    /// The `message-id` this sequence is correlated with.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// A handle that stops the sequence from another task, e.g. a signal
    /// handler ending a subscription.
    pub fn canceler(&self) -> Canceler {
        Canceler {
            router: self.router.clone(),
            message_id: self.message_id,
        }
    }

    /// Consumes the sequence and returns its single reply. Used for
    /// request/reply operations where exactly one envelope is expected.
    pub async fn first(mut self) -> Result<Envelope, Error> {
        match self.next().await {
            Some(result) => result,
            None => Err(Error::SessionClosed),
        }
    }

    fn detach(&self) {
        if let Ok(mut router) = self.router.lock() {
            router.waiters.remove(&self.message_id);
        }
    }
}

impl Stream for Replies {
    type Item = Result<Envelope, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    // an error terminates the sequence
                    self.finished = true;
                    self.detach();
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Replies {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Cancels a [`Replies`] sequence. Cloneable and detached from the
/// sequence's lifetime.
#[derive(Clone)]
pub struct Canceler {
    router: Arc<Mutex<Router>>,
    message_id: u64,
}

impl Canceler {
    /// Detaches the request from the session. The sequence observes the
    /// cancellation before any further emission and completes.
    pub fn cancel(&self) {
        if let Ok(mut router) = self.router.lock() {
            // dropping the waiter's sender closes the channel
            router.waiters.remove(&self.message_id);
        }
    }
}
