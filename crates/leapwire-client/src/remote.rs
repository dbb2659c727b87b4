//! Host-side subscriptions.
//!
//! A host only forwards a pump's events after the command pump has been
//! asked to `listen` on it. The first local subscriber on a pump asks, and
//! once the last one is gone the host is told to `stoplistening`. Each
//! remote subscription gets its own listener name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use leapwire_value::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::router::Router;

pub(crate) struct RemoteListens {
    command_pump: String,
    call_timeout: Option<Duration>,
    // source pump -> listener name the host knows us by
    active: Mutex<HashMap<String, String>>,
}

impl RemoteListens {
    pub(crate) fn new(command_pump: String, call_timeout: Option<Duration>) -> Self {
        Self {
            command_pump,
            call_timeout,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure the host forwards `pump`. Asks only when no remote
    /// subscription for `pump` is active.
    pub(crate) async fn ensure(&self, router: &Arc<Router>, pump: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.contains_key(pump) {
            return Ok(());
        }
        let name = listener_name();
        self.request(router, "listen", &name, pump).await?;
        debug!(pump, listener = %name, "host listening");
        active.insert(pump.to_string(), name);
        Ok(())
    }

    /// Tell the host to stop forwarding `pump` if nothing local listens to it
    /// any more.
    pub(crate) async fn release(&self, router: &Arc<Router>, pump: &str) {
        let mut active = self.active.lock().await;
        if router.has_subscribers(pump) || router.is_closed() {
            return;
        }
        let Some(name) = active.remove(pump) else {
            return;
        };
        match self.request(router, "stoplistening", &name, pump).await {
            Ok(()) => debug!(pump, listener = %name, "host stopped listening"),
            Err(err) => warn!(pump, listener = %name, error = %err, "stoplistening failed"),
        }
    }

    /// [`release`](Self::release) from synchronous code. Needs a tokio
    /// runtime; outside one the host keeps forwarding until disconnect.
    pub(crate) fn release_later(self: &Arc<Self>, router: &Arc<Router>, pump: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(pump, "no runtime, stoplistening skipped");
            return;
        };
        let remote = Arc::clone(self);
        let router = Arc::clone(router);
        let pump = pump.to_string();
        runtime.spawn(async move { remote.release(&router, &pump).await });
    }

    async fn request(
        &self,
        router: &Arc<Router>,
        op: &str,
        listener: &str,
        source: &str,
    ) -> Result<()> {
        let mut args = Map::with_capacity(3);
        args.insert("op", op);
        args.insert("listener", listener);
        args.insert("source", source);

        let call = router
            .issue_call(&self.command_pump, Value::Map(args))
            .await?;
        match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(reply) => reply.map(drop),
                Err(_) => Err(ClientError::Timeout(limit)),
            },
            None => call.await.map(drop),
        }
    }
}

fn listener_name() -> String {
    format!("leapwire-{}", Uuid::new_v4())
}
