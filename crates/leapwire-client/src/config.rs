use std::time::Duration;

use leapwire_frame::DEFAULT_MAX_PAYLOAD;

/// Where a request's correlation id travels and where replies are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyRouting {
    /// `reqid` is a sibling of `pump` and `data` in the envelope. Replies are
    /// matched on the envelope `reqid` whatever pump they arrive on.
    #[default]
    Envelope,
    /// The viewer convention: `reply` and `reqid` are stamped into the
    /// (map) payload, and replies come back on the reply pump with `reqid`
    /// inside their data. A top-level `reqid` is still honoured.
    Payload,
}

/// Configuration for the welcome message a host sends on connect.
#[derive(Debug, Clone)]
pub struct WelcomeConfig {
    /// How long to wait for the welcome frame.
    pub timeout: Duration,
}

impl Default for WelcomeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`Client`](crate::Client) connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline applied by [`Client::call`](crate::Client::call). `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Maximum frame payload size in either direction.
    pub max_payload_size: usize,
    /// Reply correlation convention.
    pub reply_routing: ReplyRouting,
    /// Read the host's welcome message before anything else.
    pub welcome: Option<WelcomeConfig>,
    /// Reply pump to use when there is no welcome to learn it from.
    pub reply_pump: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            reply_routing: ReplyRouting::default(),
            welcome: None,
            reply_pump: None,
        }
    }
}

impl ClientConfig {
    /// Settings for talking to a viewer over stdio: read its welcome and use
    /// payload reply routing.
    pub fn viewer() -> Self {
        Self {
            reply_routing: ReplyRouting::Payload,
            welcome: Some(WelcomeConfig::default()),
            ..Self::default()
        }
    }
}
