use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use uuid::Uuid;

use crate::subscription::kinds::SubscriptionKind;

/// Caller-facing end of a subscription.
///
/// The handle stays valid across reconnects: after a failover the stream
/// continues from the item following the last one delivered here. It ends
/// (yields `None`) when unsubscribed, when the client shuts down, or when
/// dropped.
pub struct Subscription<T> {
    id: Uuid,
    kind: SubscriptionKind,
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: Uuid,
        kind: SubscriptionKind,
        rx: mpsc::Receiver<T>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            kind,
            rx,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
        }
    }

    /// Stable id of this handle; unaffected by server-side re-keying.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next item, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        // Registers a waker on the token; the sender may outlive the cancel.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}
