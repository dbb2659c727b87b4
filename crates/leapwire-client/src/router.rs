//! Per-connection routing state: pending calls keyed by correlation id and
//! listeners keyed by pump.
//!
//! One read task per connection feeds inbound frames through
//! [`Router::dispatch_frame`]. Outbound frames go through a single
//! `FramedWrite` behind an async mutex, so frames never interleave. The
//! routing tables sit behind a plain mutex that is never held across an
//! `.await` or while a listener runs.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use leapwire_frame::{FrameError, LeapCodec};
use leapwire_value::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ReplyRouting;
use crate::envelope::{stray_reqid, Envelope, NO_CORRELATION};
use crate::error::{ClientError, Result};
use crate::pending::PendingCall;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub(crate) type FrameStream = FramedRead<BoxedReader, LeapCodec>;
type FrameSink = FramedWrite<BoxedWriter, LeapCodec>;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type ReplySlot = oneshot::Sender<Result<Value>>;

/// Upper bound on shutting the write half down once the connection is torn down.
pub(crate) const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Identifies one registered listener; pass it back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pump: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn pump(&self) -> &str {
        &self.pump
    }
}

#[derive(Default)]
struct RouterState {
    pending: HashMap<i32, ReplySlot>,
    subscriptions: HashMap<String, Vec<(u64, Callback)>>,
    closed: Option<String>,
}

pub(crate) struct Router {
    state: Mutex<RouterState>,
    writer: tokio::sync::Mutex<Option<FrameSink>>,
    next_id: AtomicI32,
    next_subscription: AtomicU64,
    routing: ReplyRouting,
    reply_pump: Option<String>,
    shutdown: CancellationToken,
}

impl Router {
    pub(crate) fn new(
        writer: FrameSink,
        routing: ReplyRouting,
        reply_pump: Option<String>,
    ) -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
            writer: tokio::sync::Mutex::new(Some(writer)),
            next_id: AtomicI32::new(1),
            next_subscription: AtomicU64::new(1),
            routing,
            reply_pump,
            shutdown: CancellationToken::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RouterState> {
        // Nothing panics while holding the lock; recover the data if something did.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next correlation id: starts at 1, wraps from `i32::MAX` back to 1 and
    /// never yields [`NO_CORRELATION`].
    pub(crate) fn next_correlation_id(&self) -> i32 {
        let step = |id: i32| Some(if id >= i32::MAX || id < 1 { 1 } else { id + 1 });
        match self.next_id.fetch_update(Ordering::Relaxed, Ordering::Relaxed, step) {
            Ok(id) | Err(id) => id,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock_state().closed.is_some()
    }

    fn closed_error(reason: &str) -> ClientError {
        ClientError::ConnectionClosed(reason.to_string())
    }

    /// The error for an operation cut short by teardown.
    fn teardown_error(&self) -> ClientError {
        match &self.lock_state().closed {
            Some(reason) => Self::closed_error(reason),
            None => Self::closed_error("connection closed by client"),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.lock_state().closed {
            Some(reason) => Err(Self::closed_error(reason)),
            None => Ok(()),
        }
    }

    /// Send a correlated request and return the handle its reply resolves.
    ///
    /// The pending slot is registered before the frame is written, so a reply
    /// cannot arrive ahead of it.
    pub(crate) async fn issue_call(
        self: &Arc<Self>,
        pump: &str,
        payload: Value,
    ) -> Result<PendingCall> {
        if self.routing == ReplyRouting::Payload && !matches!(payload, Value::Map(_)) {
            return Err(ClientError::PayloadNotMap);
        }

        let (tx, rx) = oneshot::channel();
        let reqid = {
            let mut state = self.lock_state();
            if let Some(reason) = &state.closed {
                return Err(Self::closed_error(reason));
            }
            let mut reqid = self.next_correlation_id();
            while state.pending.contains_key(&reqid) {
                reqid = self.next_correlation_id();
            }
            state.pending.insert(reqid, tx);
            reqid
        };
        // Dropping the call (including on error below) removes the slot.
        let call = PendingCall::new(reqid, rx, Arc::clone(self));

        let envelope = self.request_envelope(pump, payload, reqid);
        debug!(pump, reqid, "issuing call");
        self.send(envelope).await?;
        Ok(call)
    }

    fn request_envelope(&self, pump: &str, payload: Value, reqid: i32) -> Envelope {
        match (self.routing, payload) {
            (ReplyRouting::Payload, Value::Map(mut data)) => {
                if let Some(reply_pump) = &self.reply_pump {
                    data.insert("reply", reply_pump.as_str());
                }
                data.insert("reqid", reqid);
                Envelope::new(pump, data)
            }
            (_, payload) => Envelope::new(pump, payload).with_reqid(reqid),
        }
    }

    /// Send an uncorrelated message.
    pub(crate) async fn post(&self, pump: &str, payload: Value) -> Result<()> {
        self.ensure_open()?;
        debug!(pump, "posting");
        self.send(Envelope::new(pump, payload)).await
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let payload = Bytes::from(envelope.encode());
        let len = payload.len();

        // Teardown must be able to interrupt a write the peer is not draining.
        let mut guard = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(self.teardown_error()),
            guard = self.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(self.teardown_error());
        };

        let written = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            written = writer.send(payload) => Some(written),
        };
        let Some(written) = written else {
            drop(guard);
            debug!(len, "write abandoned on teardown");
            return Err(self.teardown_error());
        };
        match written {
            Ok(()) => {
                trace!(len, "frame written");
                Ok(())
            }
            // Rejected before anything reached the stream.
            Err(err @ FrameError::PayloadTooLarge { .. }) => Err(ClientError::Frame(err)),
            Err(err) => {
                drop(guard);
                let reason = format!("write failed: {err}");
                warn!(error = %err, "write failed, closing connection");
                self.teardown(&reason);
                Err(ClientError::ConnectionClosed(reason))
            }
        }
    }

    pub(crate) fn subscribe(
        &self,
        pump: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle> {
        let mut state = self.lock_state();
        if let Some(reason) = &state.closed {
            return Err(Self::closed_error(reason));
        }
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        state
            .subscriptions
            .entry(pump.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        debug!(pump, id, "subscribed");
        Ok(SubscriptionHandle {
            pump: pump.to_string(),
            id,
        })
    }

    pub(crate) fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut state = self.lock_state();
        let Some(listeners) = state.subscriptions.get_mut(&handle.pump) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            state.subscriptions.remove(&handle.pump);
        }
        if removed {
            debug!(pump = %handle.pump, id = handle.id, "unsubscribed");
        }
        removed
    }

    pub(crate) fn has_subscribers(&self, pump: &str) -> bool {
        self.lock_state().subscriptions.contains_key(pump)
    }

    /// Drop a pending slot without resolving it.
    pub(crate) fn forget(&self, reqid: i32) {
        if self.lock_state().pending.remove(&reqid).is_some() {
            trace!(reqid, "pending call dropped");
        }
    }

    /// Resolve a pending call with [`ClientError::Cancelled`].
    pub(crate) fn cancel(&self, reqid: i32) -> bool {
        let slot = self.lock_state().pending.remove(&reqid);
        match slot {
            Some(tx) => {
                debug!(reqid, "call cancelled");
                let _ = tx.send(Err(ClientError::Cancelled));
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Own the read half until the stream ends, fails, or the client closes.
    pub(crate) async fn run(self: Arc<Self>, mut frames: FrameStream) {
        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break "connection closed by client".to_string(),
                next = frames.next() => match next {
                    Some(Ok(frame)) => self.dispatch_frame(&frame.payload),
                    None | Some(Err(FrameError::ConnectionClosed)) => {
                        break "peer closed the connection".to_string()
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "frame error, closing connection");
                        break format!("frame error: {err}");
                    }
                },
            }
        };
        self.teardown(&reason);
    }

    /// Route one inbound payload. Bad payloads are logged and skipped.
    pub(crate) fn dispatch_frame(&self, payload: &[u8]) {
        let value = match leapwire_value::decode(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, len = payload.len(), "dropping undecodable frame");
                return;
            }
        };

        let hint = stray_reqid(&value);
        match Envelope::from_value(value) {
            Ok(envelope) => self.route(envelope),
            Err(err) => {
                let slot = hint.and_then(|reqid| self.lock_state().pending.remove(&reqid));
                match slot {
                    Some(tx) => {
                        warn!(error = %err, reqid = ?hint, "invalid envelope for pending call");
                        let _ = tx.send(Err(err));
                    }
                    None => warn!(error = %err, "dropping invalid envelope"),
                }
            }
        }
    }

    fn route(&self, envelope: Envelope) {
        let Envelope {
            pump,
            mut data,
            reqid,
            ..
        } = envelope;

        let listeners: Vec<Callback> = {
            let mut state = self.lock_state();
            if let Some((reqid, tx)) = self.take_reply(&mut state, &pump, reqid, &mut data) {
                drop(state);
                debug!(%pump, reqid, "reply matched");
                let _ = tx.send(Ok(data));
                return;
            }
            state
                .subscriptions
                .get(&pump)
                .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };

        if listeners.is_empty() {
            debug!(%pump, "no listener, dropping message");
            return;
        }

        trace!(%pump, listeners = listeners.len(), "delivering event");
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| (*listener)(&data))).is_err() {
                warn!(%pump, "listener panicked");
            }
        }
    }

    /// Find the pending call a message answers, if any.
    ///
    /// The envelope `reqid` wins. Under payload routing, a map arriving on the
    /// reply pump is matched on its own `reqid`, which is stripped from the
    /// data handed back to the caller.
    fn take_reply(
        &self,
        state: &mut RouterState,
        pump: &str,
        reqid: Option<i32>,
        data: &mut Value,
    ) -> Option<(i32, ReplySlot)> {
        if let Some(reqid) = reqid.filter(|id| *id != NO_CORRELATION) {
            if let Some(tx) = state.pending.remove(&reqid) {
                return Some((reqid, tx));
            }
        }

        if self.routing != ReplyRouting::Payload || self.reply_pump.as_deref() != Some(pump) {
            return None;
        }
        let reqid = data.get("reqid").and_then(Value::as_integer)?;
        let tx = state.pending.remove(&reqid)?;
        if let Some(map) = data.as_map_mut() {
            map.remove("reqid");
        }
        Some((reqid, tx))
    }

    /// Mark the connection dead, fail every pending call and drop every
    /// listener. Only the first call has any effect.
    pub(crate) fn teardown(&self, reason: &str) {
        let (pending, subscriptions) = {
            let mut state = self.lock_state();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.to_string());
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.subscriptions),
            )
        };
        self.shutdown.cancel();

        info!(
            reason,
            pending = pending.len(),
            subscriptions = subscriptions.len(),
            "connection closed"
        );
        for (_, tx) in pending {
            let _ = tx.send(Err(Self::closed_error(reason)));
        }
        drop(subscriptions);
    }

    /// Shut down the write half, giving up after [`WRITER_SHUTDOWN_GRACE`].
    ///
    /// Call after [`teardown`](Self::teardown), which releases any write in
    /// progress. Bytes of a frame abandoned mid-write are discarded, not
    /// flushed.
    pub(crate) async fn shutdown_writer(&self) {
        let writer = match timeout(WRITER_SHUTDOWN_GRACE, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                warn!("writer still busy, skipping shutdown");
                return;
            }
        };
        let Some(mut writer) = writer else {
            return;
        };
        match timeout(WRITER_SHUTDOWN_GRACE, writer.get_mut().shutdown()).await {
            Ok(Ok(())) => trace!("write half shut down"),
            Ok(Err(err)) => debug!(error = %err, "error shutting down writer"),
            Err(_) => debug!("peer not draining, dropping write half"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn router(
        routing: ReplyRouting,
        reply_pump: Option<&str>,
    ) -> (Arc<Router>, tokio::io::DuplexStream) {
        let (client, host) = tokio::io::duplex(1024);
        let sink = FramedWrite::new(Box::new(client) as BoxedWriter, LeapCodec::new());
        let router = Arc::new(Router::new(sink, routing, reply_pump.map(str::to_string)));
        (router, host)
    }

    #[tokio::test]
    async fn correlation_ids_start_at_one_and_skip_zero_on_wrap() {
        let (router, _host) = router(ReplyRouting::Envelope, None);
        assert_eq!(router.next_correlation_id(), 1);
        assert_eq!(router.next_correlation_id(), 2);

        router.next_id.store(i32::MAX, Ordering::Relaxed);
        assert_eq!(router.next_correlation_id(), i32::MAX);
        assert_eq!(router.next_correlation_id(), 1);
    }

    #[tokio::test]
    async fn listeners_snapshot_allows_reentrant_unsubscribe() {
        let (router, _host) = router(ReplyRouting::Envelope, None);
        let hits = Arc::new(AtomicUsize::new(0));

        let handle = Arc::new(Mutex::new(None::<SubscriptionHandle>));
        let weak = Arc::downgrade(&router);
        let h = Arc::clone(&handle);
        let counter = Arc::clone(&hits);
        let sub = router
            .subscribe("X", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let (Some(router), Some(handle)) = (weak.upgrade(), h.lock().unwrap().take()) {
                    router.unsubscribe(&handle);
                }
            })
            .unwrap();
        *handle.lock().unwrap() = Some(sub);

        router.dispatch_frame(b"{'pump':'X','data':i42}");
        router.dispatch_frame(b"{'pump':'X','data':i43}");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_others() {
        let (router, _host) = router(ReplyRouting::Envelope, None);
        let hits = Arc::new(AtomicUsize::new(0));

        router.subscribe("X", |_| panic!("boom")).unwrap();
        let counter = Arc::clone(&hits);
        router
            .subscribe("X", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        router.dispatch_frame(b"{'pump':'X','data':i1}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_handle_is_false() {
        let (router, _host) = router(ReplyRouting::Envelope, None);
        let handle = router.subscribe("X", |_| {}).unwrap();

        assert!(router.unsubscribe(&handle));
        assert!(!router.unsubscribe(&handle));
        assert_eq!(handle.pump(), "X");
    }

    #[tokio::test]
    async fn payload_routing_strips_reqid_from_reply() {
        let (router, _host) = router(ReplyRouting::Payload, Some("reply-pump"));
        let mut call = router
            .issue_call("cmd", Value::Map(Default::default()))
            .await
            .unwrap();
        let reqid = call.reqid();

        router.dispatch_frame(
            format!("{{'pump':'reply-pump','data':{{'reqid':i{reqid},'ok':true}}}}").as_bytes(),
        );

        let reply = (&mut call).await.unwrap();
        assert_eq!(reply.get("ok"), Some(&Value::Boolean(true)));
        assert_eq!(reply.get("reqid"), None);
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn payload_routing_requires_map() {
        let (router, _host) = router(ReplyRouting::Payload, Some("reply-pump"));
        let err = router.issue_call("cmd", Value::Integer(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::PayloadNotMap));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn teardown_releases_a_stalled_write() {
        let (router, _host) = router(ReplyRouting::Envelope, None);
        let sender = Arc::clone(&router);
        let stalled = tokio::spawn(async move {
            sender.post("big", Value::from("x".repeat(64 * 1024))).await
        });
        tokio::task::yield_now().await;

        router.teardown("closing");
        let outcome = timeout(Duration::from_secs(2), stalled)
            .await
            .expect("stalled write should be released")
            .unwrap();
        assert!(matches!(outcome, Err(ClientError::ConnectionClosed(reason)) if reason == "closing"));

        timeout(Duration::from_secs(2), router.shutdown_writer())
            .await
            .expect("shutdown should not hang");
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_fails_fast_afterwards() {
        let (router, _host) = router(ReplyRouting::Envelope, None);
        router.teardown("first");
        router.teardown("second");

        assert!(router.is_closed());
        let err = router.post("x", Value::Undefined).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed(reason) if reason == "first"));
        assert!(router.subscribe("x", |_| {}).is_err());
    }
}
