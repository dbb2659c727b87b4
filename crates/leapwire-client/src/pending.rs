use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use leapwire_value::Value;
use tokio::sync::oneshot;

use crate::error::{ClientError, Result};
use crate::router::Router;

/// A request whose reply has not arrived yet.
///
/// Await it for the reply payload. Dropping it (or calling
/// [`PendingCall::cancel`]) forgets the call; a reply that arrives later is
/// treated as unsolicited. Bytes already written are not recalled.
#[must_use = "a dropped PendingCall forgets its reply"]
pub struct PendingCall {
    reqid: i32,
    rx: oneshot::Receiver<Result<Value>>,
    router: Arc<Router>,
    finished: bool,
}

impl PendingCall {
    pub(crate) fn new(reqid: i32, rx: oneshot::Receiver<Result<Value>>, router: Arc<Router>) -> Self {
        Self {
            reqid,
            rx,
            router,
            finished: false,
        }
    }

    /// Correlation id the request was sent with.
    pub fn reqid(&self) -> i32 {
        self.reqid
    }

    /// A handle that can cancel this call from another task.
    pub fn abort_handle(&self) -> CallAbortHandle {
        CallAbortHandle {
            reqid: self.reqid,
            router: Arc::downgrade(&self.router),
        }
    }

    /// Stop waiting for the reply.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.finished {
            return Poll::Ready(Err(ClientError::ConnectionClosed(
                "reply already taken".to_string(),
            )));
        }
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(ClientError::ConnectionClosed(
                "reply slot dropped".to_string(),
            )),
        };
        self.finished = true;
        Poll::Ready(outcome)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        // Once resolved the id may already belong to a newer call.
        if !self.finished {
            self.router.forget(self.reqid);
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("reqid", &self.reqid)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Cancels a [`PendingCall`] from anywhere; the awaiting side sees
/// [`ClientError::Cancelled`].
#[derive(Debug, Clone)]
pub struct CallAbortHandle {
    reqid: i32,
    router: Weak<Router>,
}

impl CallAbortHandle {
    /// Returns `false` if the call had already resolved.
    pub fn cancel(&self) -> bool {
        self.router
            .upgrade()
            .is_some_and(|router| router.cancel(self.reqid))
    }
}
