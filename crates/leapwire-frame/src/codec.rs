use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Separates the decimal length from the payload.
pub const LENGTH_DELIMITER: u8 = b':';

/// Readers give up looking for the delimiter after this many bytes.
pub const MAX_LENGTH_FIELD_LEN: usize = 16;

/// Default maximum payload size: 0x0FFF_FFFF bytes (just under 256 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 0x0FFF_FFFF;

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (length field + delimiter + payload).
    pub fn wire_size(&self) -> usize {
        decimal_len(self.payload.len()) + 1 + self.payload.len()
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────────┬─────┬──────────────────┐
/// │ Length             │ ':' │ Payload          │
/// │ (ASCII decimal,    │     │ (Length bytes)   │
/// │  no leading zeros) │     │                  │
/// └────────────────────┴─────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = payload.len().to_string();
    dst.reserve(length.len() + 1 + payload.len());
    dst.put_slice(length.as_bytes());
    dst.put_u8(LENGTH_DELIMITER);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
///
/// ASCII whitespace around the digits is tolerated. Payload bytes are never
/// inspected, so a `:` inside the payload is harmless.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let window = src.len().min(MAX_LENGTH_FIELD_LEN);
    let Some(delim) = src[..window].iter().position(|b| *b == LENGTH_DELIMITER) else {
        // Fail on garbage as soon as it shows up rather than waiting for 16 bytes.
        if let Some(bad) = src[..window]
            .iter()
            .find(|b| !b.is_ascii_digit() && !b.is_ascii_whitespace())
        {
            return Err(FrameError::InvalidLength(
                String::from_utf8_lossy(&[*bad]).into_owned(),
            ));
        }
        if window == MAX_LENGTH_FIELD_LEN {
            return Err(FrameError::LengthFieldTooLong {
                max: MAX_LENGTH_FIELD_LEN,
            });
        }
        return Ok(None); // Need more data
    };

    let payload_len = parse_length(&src[..delim])?;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = delim + 1 + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(delim + 1);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { payload }))
}

fn parse_length(field: &[u8]) -> Result<usize> {
    let invalid = || FrameError::InvalidLength(String::from_utf8_lossy(field).into_owned());

    let digits = field.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    // At most 15 digits, so this only overflows on 32-bit targets.
    digits.iter().try_fold(0usize, |acc, digit| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(usize::from(digit - b'0')))
            .ok_or_else(invalid)
    })
}

fn decimal_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: [`DEFAULT_MAX_PAYLOAD`].
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
