use std::sync::{Arc, Weak};

use leapwire_value::Value;
use tokio::sync::mpsc;

use crate::remote::RemoteListens;
use crate::router::{Router, SubscriptionHandle};

/// A queue of events from one pump.
///
/// Messages queue up between [`recv`](Listener::recv) calls. After the
/// connection closes, already-queued messages are still delivered and then
/// `recv` returns `None`. Dropping the listener unsubscribes it.
pub struct Listener {
    rx: mpsc::UnboundedReceiver<Value>,
    handle: SubscriptionHandle,
    router: Weak<Router>,
    remote: Option<Arc<RemoteListens>>,
}

impl Listener {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Value>,
        handle: SubscriptionHandle,
        router: Weak<Router>,
        remote: Option<Arc<RemoteListens>>,
    ) -> Self {
        Self {
            rx,
            handle,
            router,
            remote,
        }
    }

    pub fn pump(&self) -> &str {
        self.handle.pump()
    }

    /// Wait for the next event. `None` once the subscription is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Take a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Events already queued can still be read.
    ///
    /// Closing the last listener on a pump sends `stoplistening` to the
    /// host in the background.
    pub fn close(&mut self) {
        let Some(router) = self.router.upgrade() else {
            return;
        };
        if router.unsubscribe(&self.handle) {
            if let Some(remote) = &self.remote {
                remote.release_later(&router, self.handle.pump());
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("pump", &self.handle.pump())
            .finish()
    }
}
