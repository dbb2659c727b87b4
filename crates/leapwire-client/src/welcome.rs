use futures_util::{Stream, StreamExt};
use leapwire_frame::{Frame, FrameError};
use leapwire_value::Value;
use tracing::{debug, info};

use crate::config::WelcomeConfig;
use crate::envelope::{validate_pump_name, Envelope};
use crate::error::{ClientError, Result};

/// What the host announced when the connection opened.
///
/// The host sends `{'pump':<reply pump>,'data':{'command':<command pump>,
/// 'process_id':i…,'args':[…]}}` before anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    /// Pump the host expects replies to be addressed to.
    pub reply_pump: String,
    /// Pump that accepts meta-commands (`getAPIs`, `listen`, …).
    pub command_pump: String,
    pub process_id: Option<i32>,
    pub args: Vec<Value>,
}

impl Welcome {
    /// The host's process id: the announced `process_id`, else (on unix) our
    /// parent's, since hosts launch scripts directly.
    pub fn host_process_id(&self) -> Option<u32> {
        match self.process_id {
            Some(pid) => u32::try_from(pid).ok(),
            None => parent_process_id(),
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        validate_pump_name(&envelope.pump)?;

        let mut data = match envelope.data {
            Value::Map(data) => data,
            other => {
                return Err(ClientError::HandshakeFailed(format!(
                    "welcome data must be a map, got {}",
                    other.type_name()
                )))
            }
        };

        let command_pump = match data.remove("command") {
            Some(Value::String(pump)) => pump,
            Some(other) => {
                return Err(ClientError::HandshakeFailed(format!(
                    "welcome command pump must be a string, got {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(ClientError::HandshakeFailed(
                    "welcome is missing the command pump".to_string(),
                ))
            }
        };
        validate_pump_name(&command_pump)?;

        let process_id = match data.remove("process_id") {
            None | Some(Value::Undefined) => None,
            Some(Value::Integer(pid)) => Some(pid),
            Some(other) => {
                return Err(ClientError::HandshakeFailed(format!(
                    "welcome process_id must be an integer, got {}",
                    other.type_name()
                )))
            }
        };

        let args = match data.remove("args") {
            None | Some(Value::Undefined) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(other) => {
                return Err(ClientError::HandshakeFailed(format!(
                    "welcome args must be an array, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            reply_pump: envelope.pump,
            command_pump,
            process_id,
            args,
        })
    }
}

#[cfg(unix)]
fn parent_process_id() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn parent_process_id() -> Option<u32> {
    None
}

/// Read and validate the welcome frame.
pub(crate) async fn read_welcome<S>(frames: &mut S, config: &WelcomeConfig) -> Result<Welcome>
where
    S: Stream<Item = std::result::Result<Frame, FrameError>> + Unpin,
{
    debug!(timeout = ?config.timeout, "waiting for welcome");

    let frame = match tokio::time::timeout(config.timeout, frames.next()).await {
        Err(_) => return Err(ClientError::Timeout(config.timeout)),
        Ok(None) | Ok(Some(Err(FrameError::ConnectionClosed))) => {
            return Err(ClientError::ConnectionClosed(
                "connection closed during welcome".to_string(),
            ))
        }
        Ok(Some(Err(err))) => return Err(ClientError::Frame(err)),
        Ok(Some(Ok(frame))) => frame,
    };

    let value = leapwire_value::decode(&frame.payload)?;
    let envelope =
        Envelope::from_value(value).map_err(|err| ClientError::HandshakeFailed(err.to_string()))?;
    let welcome = Welcome::from_envelope(envelope)?;

    info!(
        reply_pump = %welcome.reply_pump,
        command_pump = %welcome.command_pump,
        process_id = ?welcome.host_process_id(),
        "received welcome"
    );
    Ok(welcome)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::stream;

    use super::*;

    fn frames(
        payloads: &[&'static str],
    ) -> impl Stream<Item = std::result::Result<Frame, FrameError>> + Unpin {
        let items: Vec<_> = payloads
            .iter()
            .map(|p| Ok(Frame::new(Bytes::from_static(p.as_bytes()))))
            .collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn parses_viewer_welcome() {
        let mut input = frames(&[
            "{'pump':'reply-7','data':{'command':'cmd-7','process_id':i4242,'args':['--x']}}",
        ]);

        let welcome = read_welcome(&mut input, &WelcomeConfig::default())
            .await
            .unwrap();

        assert_eq!(welcome.reply_pump, "reply-7");
        assert_eq!(welcome.command_pump, "cmd-7");
        assert_eq!(welcome.process_id, Some(4242));
        assert_eq!(welcome.host_process_id(), Some(4242));
        assert_eq!(welcome.args, vec![Value::from("--x")]);
    }

    #[tokio::test]
    async fn optional_fields_may_be_missing() {
        let mut input = frames(&["{'pump':'r','data':{'command':'c'}}"]);

        let welcome = read_welcome(&mut input, &WelcomeConfig::default())
            .await
            .unwrap();

        assert_eq!(welcome.process_id, None);
        assert!(welcome.args.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn missing_process_id_falls_back_to_parent() {
        let welcome = Welcome {
            reply_pump: "r".to_string(),
            command_pump: "c".to_string(),
            process_id: None,
            args: Vec::new(),
        };
        assert_eq!(
            welcome.host_process_id(),
            Some(std::os::unix::process::parent_id())
        );

        let negative = Welcome {
            process_id: Some(-1),
            ..welcome
        };
        assert_eq!(negative.host_process_id(), None);
    }

    #[tokio::test]
    async fn rejects_bad_welcomes() {
        for payload in [
            "{'pump':'r','data':i1}",
            "{'pump':'r','data':{}}",
            "{'pump':'r','data':{'command':i1}}",
            "{'pump':'r','data':{'command':''}}",
            "{'pump':'r','data':{'command':'c','process_id':'x'}}",
            "{'data':{'command':'c'}}",
        ] {
            let mut input = frames(&[payload]);
            let err = read_welcome(&mut input, &WelcomeConfig::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::HandshakeFailed(_)), "{payload}");
        }
    }

    #[tokio::test]
    async fn undecodable_welcome_is_malformed() {
        let mut input = frames(&["{'pump':"]);
        let err = read_welcome(&mut input, &WelcomeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
    }

    #[tokio::test]
    async fn eof_before_welcome() {
        let mut input = frames(&[]);
        let err = read_welcome(&mut input, &WelcomeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_times_out() {
        let mut input = stream::pending::<std::result::Result<Frame, FrameError>>();
        let config = WelcomeConfig {
            timeout: Duration::from_millis(50),
        };

        let err = read_welcome(&mut input, &config).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_millis(50)));
    }
}
