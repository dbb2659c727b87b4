//! Decimal length-prefixed framing for the LEAP protocol.
//!
//! Every message on a LEAP stream is framed as:
//!
//! ```text
//! <payload length in ASCII decimal>:<payload bytes>
//! ```
//!
//! e.g. `24:{'pump':'foo','data':{}}`. There is no trailing delimiter; the
//! length alone says where the next frame starts. The payload is opaque at
//! this layer.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::LeapCodec;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, LENGTH_DELIMITER,
    MAX_LENGTH_FIELD_LEN,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
