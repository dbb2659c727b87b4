use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Blocking `<len>:<payload>` writer.
///
/// The length prefix and payload go out from one buffer and are flushed
/// before `send` returns, so a frame is never split by another writer's frame
/// as long as callers serialize access to the writer.
pub struct FrameWriter<W> {
    inner: W,
    scratch: BytesMut,
    config: FrameConfig,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            config,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(&frame.payload)
    }

    /// Frame `payload` and write it out.
    ///
    /// A payload over `max_payload_size` is rejected before anything is
    /// written. A closed peer (`BrokenPipe`, or a zero-length write) is
    /// [`FrameError::ConnectionClosed`]. With `write_timeout` set, a stalled
    /// peer is [`FrameError::Io`] (`WouldBlock` or `TimedOut`) and the frame
    /// may be partly written.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.config.max_payload_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.scratch.clear();
        encode_frame(payload, &mut self.scratch)?;

        let mut rest = &self.scratch[..];
        while !rest.is_empty() {
            match self.inner.write(rest) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => rest = &rest[n..],
                Err(err) if self.retryable(&err) => {}
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(err.into()),
            }
        }
        trace!(len = payload.len(), "frame written");

        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if self.retryable(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    // A socket with a send timeout reports it as WouldBlock; retrying that
    // would never give up.
    fn retryable(&self, err: &std::io::Error) -> bool {
        match err.kind() {
            ErrorKind::Interrupted => true,
            ErrorKind::WouldBlock => self.config.write_timeout.is_none(),
            _ => false,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
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
impl FrameWriter<std::os::unix::net::UnixStream> {
    /// Like [`with_config`](Self::with_config), also setting the socket's
    /// write timeout from `config.write_timeout`.
    pub fn with_config_unix(
        inner: std::os::unix::net::UnixStream,
        config: FrameConfig,
    ) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn post_of_empty_map_matches_host_bytes() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"{'pump':'foo','data':{}}").unwrap();

        assert_eq!(written(writer), b"24:{'pump':'foo','data':{}}");
    }

    #[test]
    fn frames_are_concatenated_without_separators() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"one").unwrap();
        writer.send(b"").unwrap();
        writer.send(b"three").unwrap();

        assert_eq!(written(writer), b"3:one0:5:three");
    }

    #[test]
    fn oversized_payload_writes_nothing() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn send_flushes() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn write_frame_sends_payload() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let frame = Frame::new("abc");

        writer.write_frame(&frame).unwrap();

        assert_eq!(written(writer), b"3:abc");
    }

    #[test]
    fn transient_errors_are_retried() {
        for kind in [ErrorKind::Interrupted, ErrorKind::WouldBlock] {
            let mut writer = FrameWriter::new(FailFirstWriter::new(kind));
            writer.send(b"i5").unwrap();

            assert_eq!(writer.into_inner().data, b"2:i5", "{kind:?}");
        }
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    #[cfg(unix)]
    fn connection_closed_when_peer_hangs_up() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(right);
        let mut writer = FrameWriter::new(left);

        let err = writer.send(b"anyone there?").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    #[cfg(unix)]
    fn applies_write_timeout_for_unix_stream() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();

        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let writer = FrameWriter::with_config_unix(left, cfg).unwrap();
        // The kernel rounds the timeout up to its tick.
        let applied = writer.get_ref().write_timeout().unwrap().unwrap();
        assert!(applied >= std::time::Duration::from_millis(10), "{applied:?}");
    }

    #[test]
    fn timed_out_write_surfaces_as_io() {
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        for kind in [ErrorKind::WouldBlock, ErrorKind::TimedOut] {
            let mut writer = FrameWriter::with_config(FailFirstWriter::new(kind), cfg.clone());

            let err = writer.send(b"i5").unwrap_err();
            assert!(matches!(&err, FrameError::Io(e) if e.kind() == kind), "{kind:?}");
            assert!(writer.into_inner().data.is_empty(), "{kind:?}");
        }
    }

    #[test]
    #[cfg(unix)]
    fn stalled_unix_peer_times_out_instead_of_spinning() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(20)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_unix(left, cfg).unwrap();

        // Nobody reads `_right`, so the socket buffer fills and stays full.
        let payload = vec![b'x'; 64 * 1024];
        let started = std::time::Instant::now();
        let err = loop {
            match writer.send(&payload) {
                Ok(()) => assert!(started.elapsed() < std::time::Duration::from_secs(5)),
                Err(err) => break err,
            }
        };
        assert!(matches!(
            err,
            FrameError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails the first write and the first flush with `kind`, then behaves.
    struct FailFirstWriter {
        kind: ErrorKind,
        write_failed: bool,
        flush_failed: bool,
        data: Vec<u8>,
    }

    impl FailFirstWriter {
        fn new(kind: ErrorKind) -> Self {
            Self {
                kind,
                write_failed: false,
                flush_failed: false,
                data: Vec::new(),
            }
        }
    }

    impl Write for FailFirstWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_failed {
                self.write_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_failed {
                self.flush_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn multibyte_payload_length_counts_bytes() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send("'ü'".as_bytes()).unwrap();

        assert_eq!(written(writer), "4:'ü'".as_bytes());
    }
}
