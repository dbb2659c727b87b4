use std::time::Duration;

use leapwire_frame::FrameError;
use leapwire_value::DecodeError;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A payload could not be decoded as a notation value.
    #[error("malformed payload: {0}")]
    Malformed(#[from] DecodeError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The connection is gone; the string says why.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The call was cancelled through its abort handle.
    #[error("call cancelled")]
    Cancelled,

    /// No reply arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The host's welcome message was missing or unusable.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A message was not a well-formed envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Payload reply routing needs a map to carry `reply` and `reqid`.
    #[error("payload must be a map to expect a reply")]
    PayloadNotMap,

    /// The client configuration cannot work as given.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
