use std::io::ErrorKind;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::codec::{decode_length, MAX_LENGTH_PREFIX};
use crate::error::{FrameError, Result};

const INITIAL_PAYLOAD_CAPACITY: u64 = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// The length prefix is read one byte at a time: the payload size is unknown
/// until the varint terminates, and nothing past the frame may be consumed.
pub struct FrameReader<T> {
    inner: T,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// including EOF in the middle of a frame.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let len = self.read_length().await?;

        // Grow with the data actually received rather than trusting the prefix.
        let mut payload = Vec::with_capacity(len.min(INITIAL_PAYLOAD_CAPACITY) as usize);
        let read = (&mut self.inner).take(len).read_to_end(&mut payload).await?;
        if (read as u64) < len {
            return Err(FrameError::ConnectionClosed);
        }

        trace!(len, "read frame");
        Ok(Bytes::from(payload))
    }

    async fn read_length(&mut self) -> Result<u64> {
        let mut prefix = Vec::with_capacity(MAX_LENGTH_PREFIX);
        loop {
            let byte = match self.inner.read_u8().await {
                Ok(byte) => byte,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            };
            prefix.push(byte);

            if let Some((len, _)) = decode_length(&prefix)? {
                return Ok(len);
            }
        }
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
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use prost::encoding::encode_varint;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::codec::encode_frame;
    use crate::writer::FrameWriter;

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut buf);
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn read_single_frame() {
        let bytes = wire(&[b"hello"]);
        let mut reader = FrameReader::new(&bytes[..]);

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn read_multiple_frames() {
        let bytes = wire(&[b"one", b"two", b"three"]);
        let mut reader = FrameReader::new(&bytes[..]);

        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"three");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let bytes = wire(&[&payload]);
        let mut reader = FrameReader::new(&bytes[..]);

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn partial_read_handling() {
        // A one-byte pipe forces every read to return a single byte.
        let (mut client, server) = tokio::io::duplex(1);
        let bytes = wire(&[&[7u8; 300]]);
        let writer = tokio::spawn(async move {
            client.write_all(&bytes).await.unwrap();
        });

        let mut reader = FrameReader::new(server);
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.len(), 300);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(&b""[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_prefix() {
        let mut reader = FrameReader::new(&[0x80u8, 0x80][..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_payload() {
        let mut partial = BytesMut::new();
        encode_varint(16, &mut partial);
        partial.extend_from_slice(b"only-part");

        let mut reader = FrameReader::new(&partial[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn huge_declared_length_does_not_preallocate() {
        let mut prefix = BytesMut::new();
        encode_varint(u64::MAX >> 1, &mut prefix);

        let mut reader = FrameReader::new(&prefix[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn unterminated_length_in_stream() {
        let bytes = vec![0xFF; 32];
        let mut reader = FrameReader::new(&bytes[..]);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::MalformedLength { ref prefix } if prefix.len() == MAX_LENGTH_PREFIX
        ));
        // Nothing past the 16-byte window is consumed.
        assert_eq!(reader.get_ref().len(), 16);
    }

    #[tokio::test]
    async fn length_read_stops_at_frame_boundary() {
        let bytes = wire(&[b"a", b"bc"]);
        let mut reader = FrameReader::new(&bytes[..]);

        reader.read_frame().await.unwrap();
        assert_eq!(*reader.get_ref(), &[2u8, b'b', b'c'][..]);
    }

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.write_frame(b"ping").await.unwrap();
        writer.write_frame(b"").await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"ping");
        assert!(reader.read_frame().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_reader_writer_tasks() {
        let (left, right) = tokio::io::duplex(256);
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let reader_task = tokio::spawn(async move {
            for expected in 0..64u32 {
                let frame = reader.read_frame().await.unwrap();
                assert_eq!(frame.as_ref(), format!("msg-{expected}").as_bytes());
            }
        });

        for i in 0..64u32 {
            writer
                .write_frame(format!("msg-{i}").as_bytes())
                .await
                .unwrap();
        }

        reader_task.await.unwrap();
    }

    #[tokio::test]
    async fn accessors_and_into_inner() {
        let mut reader = FrameReader::new(&b""[..]);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }
}
