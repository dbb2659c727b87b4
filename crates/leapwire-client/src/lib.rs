//! Async LEAP client.
//!
//! A [`Client`] talks to a LEAP host over any pair of tokio byte streams
//! (usually the host-provided stdin/stdout). It correlates requests with
//! their replies, fans unsolicited events out to per-pump listeners, and
//! tears everything down cleanly when either side goes away.
//!
//! ```no_run
//! # async fn demo() -> leapwire_client::Result<()> {
//! use leapwire_client::{Client, ClientConfig};
//! use leapwire_value::Map;
//!
//! let client = Client::connect_stdio(ClientConfig::viewer()).await?;
//! let apis = client.sys_command("getAPIs", Map::new()).await?;
//! println!("{apis}");
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod pending;
mod remote;
mod router;
pub mod welcome;

pub use client::Client;
pub use config::{ClientConfig, ReplyRouting, WelcomeConfig};
pub use envelope::{Envelope, MAX_PUMP_NAME_LEN, NO_CORRELATION};
pub use error::{ClientError, Result};
pub use listener::Listener;
pub use pending::{CallAbortHandle, PendingCall};
pub use router::SubscriptionHandle;
pub use welcome::Welcome;
