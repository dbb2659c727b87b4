//! `tokio_util` codec for LEAP frames.
//!
//! Use with `FramedRead`/`FramedWrite` (or `Framed`) over any tokio stream.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Decodes byte streams into [`Frame`]s and encodes payloads as frames.
#[derive(Debug, Clone, Copy)]
pub struct LeapCodec {
    max_payload_size: usize,
}

impl LeapCodec {
    pub fn new() -> Self {
        Self::with_max_payload_size(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for LeapCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LeapCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for LeapCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&payload, dst)
    }
}

impl Encoder<Frame> for LeapCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        <Self as Encoder<Bytes>>::encode(self, frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_read_splits_stream() {
        let wire: &[u8] = b"2:{}24:{'pump':'foo','data':{}}";
        let mut frames = FramedRead::new(wire, LeapCodec::new());

        let first = frames.next().await.unwrap().unwrap();
        let second = frames.next().await.unwrap().unwrap();

        assert_eq!(first.payload.as_ref(), b"{}");
        assert_eq!(second.payload.as_ref(), b"{'pump':'foo','data':{}}");
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_stream_is_connection_closed() {
        let wire: &[u8] = b"2:{}10:{'pump'";
        let mut frames = FramedRead::new(wire, LeapCodec::new());

        assert!(frames.next().await.unwrap().is_ok());
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn framed_write_over_duplex() {
        let (client, host) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, LeapCodec::new());
        let mut frames = FramedRead::new(host, LeapCodec::new());

        sink.send(Bytes::from_static(b"hello")).await.unwrap();
        sink.send(Frame::new(Bytes::from_static(b"a:b"))).await.unwrap();

        assert_eq!(frames.next().await.unwrap().unwrap().payload.as_ref(), b"hello");
        assert_eq!(frames.next().await.unwrap().unwrap().payload.as_ref(), b"a:b");
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = LeapCodec::with_max_payload_size(2);
        let mut dst = BytesMut::new();

        let err = codec
            .encode(Bytes::from_static(b"abc"), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 3, max: 2 }));
        assert!(dst.is_empty());
    }

    #[test]
    fn decoder_enforces_limit() {
        let mut codec = LeapCodec::with_max_payload_size(2);
        let mut src = BytesMut::from(&b"3:abc"[..]);

        assert!(matches!(
            codec.decode(&mut src),
            Err(FrameError::PayloadTooLarge { .. })
        ));
        assert_eq!(codec.max_payload_size(), 2);
    }
}
