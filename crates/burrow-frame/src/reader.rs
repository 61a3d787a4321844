use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::time::Duration;

use bytes::BytesMut;

use crate::codec::{decode_frame, peek_length, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes past the returned frame stay buffered for the next call, so a
/// reader must not be swapped out mid-connection.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// including EOF partway through a frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }

            if let Some(length) = peek_length(&self.buf, self.config.max_payload_size)? {
                self.buf.reserve(HEADER_SIZE + length - self.buf.len());
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<TcpStream> {
    /// Create a frame reader for a TCP stream and apply the read timeout from config.
    pub fn with_config_tcp(inner: TcpStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the socket read timeout. `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::net::TcpListener;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_data_frame, encode_frame, MAX_FRAME_LENGTH};
    use crate::message::{CloseRequest, Message};

    #[test]
    fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(6, b"hello", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.frame_type, 6);
        assert_eq!(frame.body.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"one", &mut wire).unwrap();
        encode_frame(2, b"two", &mut wire).unwrap();
        encode_data_frame(b"{}", b"three", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.frame_type, f1.body.as_ref()), (1, b"one".as_ref()));
        assert_eq!((f2.frame_type, f2.body.as_ref()), (2, b"two".as_ref()));
        assert_eq!(f3.frame_type, crate::types::DATA);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn read_frame_with_large_body() {
        let body = vec![0xAB; 1024 * 1024 + 17];
        let mut wire = BytesMut::new();
        encode_frame(5, &body, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.frame_type, 5);
        assert_eq!(frame.body.as_ref(), body.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame(4, b"slow", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.frame_type, 4);
        assert_eq!(frame.body.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_u8(5);
        partial.put_i32_le(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn negative_length_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u8(5);
        wire.put_i32_le(-8);

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthOutOfRange { length: -8, .. }
        ));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u8(5);
        wire.put_i32_le(1024);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthOutOfRange {
                length: 1024,
                max: 16
            }
        ));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn unknown_tag_keeps_stream_aligned() {
        let mut wire = BytesMut::new();
        encode_frame(42, br#"{"whatever":true}"#, &mut wire).unwrap();
        Message::from(CloseRequest::new("s1", "web"))
            .encode(&mut wire)
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        let unknown = reader.read_frame().unwrap();
        assert!(Message::parse(&unknown).is_err());

        let next = reader.read_frame().unwrap();
        assert_eq!(
            Message::parse(&next).unwrap(),
            Message::from(CloseRequest::new("s1", "web"))
        );
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert_eq!(reader.config().max_payload_size, MAX_FRAME_LENGTH);
        let _inner = reader.into_inner();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let mut wire = BytesMut::new();
        encode_frame(7, b"ok", &mut wire).unwrap();

        let reader = FailFirstThenData {
            first: Some(ErrorKind::WouldBlock),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(8, b"ok", &mut wire).unwrap();

        let reader = FailFirstThenData {
            first: Some(ErrorKind::Interrupted),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.frame_type, 8);
        assert_eq!(frame.body.as_ref(), b"ok");
    }

    struct FailFirstThenData {
        first: Option<ErrorKind>,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for FailFirstThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.first.take() {
                return Err(std::io::Error::from(kind));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn read_timeout_applies_to_tcp_stream() {
        let (_client, server) = tcp_pair();

        let cfg = FrameConfig {
            read_timeout: Some(Duration::from_millis(20)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_tcp(server, cfg).unwrap();

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));

        reader.set_read_timeout(None).unwrap();
        assert_eq!(reader.get_ref().read_timeout().unwrap(), None);
        assert_eq!(reader.config().read_timeout, None);
    }

    #[test]
    fn roundtrip_over_tcp() {
        let (client, mut server) = tcp_pair();
        let mut reader = FrameReader::new(client);

        let mut wire = BytesMut::new();
        encode_frame(7, b"ping", &mut wire).unwrap();
        encode_frame(8, b"pong", &mut wire).unwrap();
        // Split across writes to force a partial header on the reader side.
        server.write_all(&wire[..3]).unwrap();
        server.write_all(&wire[3..]).unwrap();

        let first = reader.read_frame().unwrap();
        let second = reader.read_frame().unwrap();
        assert_eq!((first.frame_type, first.body.as_ref()), (7, b"ping".as_ref()));
        assert_eq!((second.frame_type, second.body.as_ref()), (8, b"pong".as_ref()));
    }
}
