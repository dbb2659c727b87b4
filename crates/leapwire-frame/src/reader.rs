use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Blocking `<len>:<payload>` reader.
///
/// Short reads are reassembled, so every `read_frame` call yields one whole
/// payload. Bytes of the next frame stay buffered between calls.
pub struct FrameReader<R> {
    inner: R,
    pending: BytesMut,
    config: FrameConfig,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Block until a whole frame is available.
    ///
    /// End of stream anywhere, even inside the length field, is
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = decode_frame(&mut self.pending, self.config.max_payload_size)? {
                trace!(len = frame.payload.len(), buffered = self.pending.len(), "frame read");
                return Ok(frame);
            }

            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Bytes received past the last returned frame.
    pub fn buffered(&self) -> &[u8] {
        &self.pending
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Give the stream back. Anything still [`buffered`](Self::buffered) is lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(unix)]
impl FrameReader<std::os::unix::net::UnixStream> {
    /// Like [`with_config`](Self::with_config), also setting the socket's
    /// read timeout from `config.read_timeout`.
    pub fn with_config_unix(
        inner: std::os::unix::net::UnixStream,
        config: FrameConfig,
    ) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
