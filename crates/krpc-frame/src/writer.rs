use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::encode_frame;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `AsyncWrite` stream.
///
/// Each frame is encoded into one buffer and written in full before
/// `write_frame` returns; `&mut self` keeps concurrent writers from
/// interleaving, so shared writers must sit behind a lock.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and send one payload.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(payload, &mut self.buf);

        match self.inner.write_all(&self.buf).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WriteZero => {
                return Err(FrameError::ConnectionClosed)
            }
            Err(err) => return Err(FrameError::Io(err)),
        }
        self.inner.flush().await?;

        trace!(len = payload.len(), "wrote frame");
        Ok(())
    }

    /// Shut down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_frame;

    #[tokio::test]
    async fn write_single_frame() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());

        writer.write_frame(b"hello").await.unwrap();

        let mut wire = BytesMut::from(writer.into_inner().as_slice());
        let frame = decode_frame(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());

        writer.write_frame(b"one").await.unwrap();
        writer.write_frame(b"two").await.unwrap();
        writer.write_frame(b"three").await.unwrap();

        let mut wire = BytesMut::from(writer.into_inner().as_slice());
        assert_eq!(decode_frame(&mut wire).unwrap().unwrap().as_ref(), b"one");
        assert_eq!(decode_frame(&mut wire).unwrap().unwrap().as_ref(), b"two");
        assert_eq!(decode_frame(&mut wire).unwrap().unwrap().as_ref(), b"three");
    }

    #[tokio::test]
    async fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_frame(b"x").await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn broken_pipe_propagates_io_error() {
        let (left, right) = tokio::io::duplex(8);
        drop(right);

        let mut writer = FrameWriter::new(left);
        let err = writer.write_frame(b"nobody listening").await.unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn accessors_and_into_inner() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    struct ZeroWriter;

    impl AsyncWrite for ZeroWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
