//! One-shot event waiter
//!
//! Future returned by `EventDispatcher::wait_for`. Dropping it before it
//! resolves removes the waiter from the dispatcher table, so cancelled waits
//! leave no residue behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::dispatcher::{DispatchError, Shared};

/// Future resolving with the first event payload accepted by a predicate
pub struct WaitFor<E> {
    shared: Arc<Shared<E>>,
    id: u64,
    rx: oneshot::Receiver<E>,
    finished: bool,
}

impl<E> WaitFor<E> {
    pub(super) fn new(shared: Arc<Shared<E>>, id: u64, rx: oneshot::Receiver<E>) -> Self {
        Self {
            shared,
            id,
            rx,
            finished: false,
        }
    }
}

impl<E> Future for WaitFor<E> {
    type Output = Result<E, DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(data)) => {
                this.finished = true;
                Poll::Ready(Ok(data))
            }
            Poll::Ready(Err(_)) => {
                this.finished = true;
                Poll::Ready(Err(DispatchError::Closed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> Drop for WaitFor<E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // A grant that raced this drop is discarded with the receiver;
        // waiters consume no resource that would need handing back.
        let mut state = self.shared.state.lock();
        state.waiters.retain(|entry| entry.id != self.id);
    }
}
