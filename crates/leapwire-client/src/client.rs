use std::sync::{Arc, Mutex};
use std::time::Duration;

use leapwire_frame::LeapCodec;
use leapwire_value::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::config::{ClientConfig, ReplyRouting};
use crate::error::{ClientError, Result};
use crate::listener::Listener;
use crate::pending::PendingCall;
use crate::remote::RemoteListens;
use crate::router::{BoxedReader, BoxedWriter, Router, SubscriptionHandle};
use crate::welcome::{read_welcome, Welcome};

/// A LEAP connection to a host.
///
/// Spawns one task that reads frames and routes them to pending calls and
/// listeners; must be created inside a tokio runtime. Dropping the client
/// tears the connection down.
pub struct Client {
    router: Arc<Router>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    welcome: Option<Welcome>,
    remote: Option<Arc<RemoteListens>>,
    config: ClientConfig,
}

impl Client {
    /// Connect over a pair of byte streams with default configuration.
    pub async fn connect<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect_with_config(reader, writer, ClientConfig::default()).await
    }

    /// Connect with explicit configuration.
    ///
    /// When `config.welcome` is set, the host's welcome frame is read before
    /// the read task starts.
    pub async fn connect_with_config<R, W>(reader: R, writer: W, config: ClientConfig) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let codec = LeapCodec::with_max_payload_size(config.max_payload_size);
        let mut frames = FramedRead::new(Box::new(reader) as BoxedReader, codec);

        let welcome = match &config.welcome {
            Some(welcome_config) => Some(read_welcome(&mut frames, welcome_config).await?),
            None => None,
        };

        let reply_pump = welcome
            .as_ref()
            .map(|welcome| welcome.reply_pump.clone())
            .or_else(|| config.reply_pump.clone());
        if config.reply_routing == ReplyRouting::Payload && reply_pump.is_none() {
            return Err(ClientError::Config(
                "payload reply routing needs a reply pump (from the welcome or the config)"
                    .to_string(),
            ));
        }

        let sink = FramedWrite::new(Box::new(writer) as BoxedWriter, codec);
        let router = Arc::new(Router::new(sink, config.reply_routing, reply_pump));
        let read_task = tokio::spawn(Arc::clone(&router).run(frames));
        let remote = welcome.as_ref().map(|welcome| {
            Arc::new(RemoteListens::new(
                welcome.command_pump.clone(),
                config.call_timeout,
            ))
        });

        info!(routing = ?config.reply_routing, "LEAP client connected");
        Ok(Self {
            router,
            read_task: Mutex::new(Some(read_task)),
            welcome,
            remote,
            config,
        })
    }

    /// Connect over this process's stdin/stdout, the way a host launches scripts.
    pub async fn connect_stdio(config: ClientConfig) -> Result<Self> {
        Self::connect_with_config(tokio::io::stdin(), tokio::io::stdout(), config).await
    }

    /// Send a request and wait for its reply.
    ///
    /// Waits at most `config.call_timeout` when set.
    pub async fn call(&self, pump: &str, payload: impl Into<Value>) -> Result<Value> {
        match self.config.call_timeout {
            Some(timeout) => self.call_with_timeout(pump, payload, timeout).await,
            None => self.issue_call(pump, payload).await?.await,
        }
    }

    /// Send a request and wait at most `timeout` for its reply.
    pub async fn call_with_timeout(
        &self,
        pump: &str,
        payload: impl Into<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let call = self.issue_call(pump, payload).await?;
        let reqid = call.reqid();
        match tokio::time::timeout(timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(pump, reqid, ?timeout, "call timed out");
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Send a request and return a handle to await or cancel its reply.
    pub async fn issue_call(&self, pump: &str, payload: impl Into<Value>) -> Result<PendingCall> {
        self.router.issue_call(pump, payload.into()).await
    }

    /// Send a message that expects no reply.
    pub async fn post(&self, pump: &str, payload: impl Into<Value>) -> Result<()> {
        self.router.post(pump, payload.into()).await
    }

    /// Call `pump` with the standard command form: `op` under `"op"` plus `args`.
    pub async fn command(&self, pump: &str, op: &str, args: Map) -> Result<Value> {
        self.call(pump, command_payload(op, args)).await
    }

    /// Like [`command`](Client::command), without waiting for a reply.
    pub async fn void_command(&self, pump: &str, op: &str, args: Map) -> Result<()> {
        self.post(pump, command_payload(op, args)).await
    }

    /// [`command`](Client::command) addressed to the command pump named in
    /// the host's welcome (`getAPIs`, `getAPI`, `ping`, ...).
    pub async fn sys_command(&self, op: &str, args: Map) -> Result<Value> {
        let pump = self
            .command_pump()
            .ok_or_else(|| ClientError::Config("no welcome, command pump unknown".to_string()))?
            .to_string();
        self.command(&pump, op, args).await
    }

    /// Run `listener` for every message arriving on `pump`.
    ///
    /// Listeners run on the read task, in registration order, and must not block.
    /// With a welcome, the first local listener on a pump also asks the
    /// command pump to `listen` on it, and this waits for that reply.
    pub async fn on(
        &self,
        pump: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle> {
        let handle = self.router.subscribe(pump, listener)?;
        if let Some(remote) = &self.remote {
            if let Err(err) = remote.ensure(&self.router, pump).await {
                self.router.unsubscribe(&handle);
                return Err(err);
            }
        }
        Ok(handle)
    }

    /// Remove a listener. Returns `false` if it was already gone.
    ///
    /// Removing the last listener on a pump sends `stoplistening` to the
    /// command pump in the background.
    pub fn off(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.router.unsubscribe(handle);
        if removed {
            if let Some(remote) = &self.remote {
                remote.release_later(&self.router, handle.pump());
            }
        }
        removed
    }

    /// Queue messages arriving on `pump` for [`Listener::recv`].
    ///
    /// Same host-side bookkeeping as [`on`](Client::on).
    pub async fn listen(&self, pump: &str) -> Result<Listener> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .on(pump, move |data| {
                let _ = tx.send(data.clone());
            })
            .await?;
        Ok(Listener::new(
            rx,
            handle,
            Arc::downgrade(&self.router),
            self.remote.clone(),
        ))
    }

    /// Tear the connection down: fail pending calls, drop listeners, stop the
    /// read task and shut the write half down.
    pub async fn close(&self) {
        self.router.teardown("connection closed by client");
        self.router.shutdown_writer().await;

        let task = self
            .read_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                debug!(error = %err, "read task ended abnormally");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.router.is_closed()
    }

    /// The host's welcome, if one was read on connect.
    pub fn welcome(&self) -> Option<&Welcome> {
        self.welcome.as_ref()
    }

    /// Shorthand for the welcome's command pump.
    pub fn command_pump(&self) -> Option<&str> {
        self.welcome
            .as_ref()
            .map(|welcome| welcome.command_pump.as_str())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.router.teardown("client dropped");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .field("welcome", &self.welcome)
            .field("config", &self.config)
            .finish()
    }
}

fn command_payload(op: &str, args: Map) -> Map {
    let mut data = Map::with_capacity(args.len() + 1);
    data.insert("op", op);
    data.extend(args.into_iter().filter(|(key, _)| key != "op"));
    data
}
